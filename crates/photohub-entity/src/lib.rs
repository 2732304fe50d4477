//! Domain entities for PhotoHub.

pub mod face;
pub mod job;
