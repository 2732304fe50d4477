//! Shared primitive types.

pub mod id;

pub use id::{EventId, PhotoId, UserId};
