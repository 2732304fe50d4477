//! Detected-face domain entities.

pub mod model;

pub use model::{FaceBounds, FaceRecord};
