//! Face-processing job domain entities.

pub mod model;
pub mod outcome;
pub mod status;

pub use model::FaceJob;
pub use outcome::ProcessOutcome;
pub use status::JobPriority;
