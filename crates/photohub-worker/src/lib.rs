//! Background face-processing job queue for PhotoHub.
//!
//! This crate provides:
//! - An admission-controlled, priority-ordered pending queue
//! - A scheduler loop that dispatches jobs under global and per-user
//!   concurrency ceilings
//! - A job processor that calls the detection and storage collaborators
//!   and retries failures with exponential backoff
//! - Periodic maintenance tasks and live status/tuning APIs

pub mod collaborators;
pub mod queue;

mod maintenance;
mod processor;
mod scheduler;

pub use queue::{
    AdmissionResult, FaceQueue, QueueStatus, RejectReason, SettingsUpdate, SubmitJob, UserStatus,
};
