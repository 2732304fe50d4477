//! Processing outcome variants.

use photohub_core::AppError;

use crate::face::FaceRecord;

/// The terminal result of one processing pass over a job.
///
/// A closed set so the processor's branching stays exhaustive: a detection
/// pass either found faces, found none (a valid outcome, persisted as
/// "processed, no faces"), or failed. Failures split into retryable and
/// terminal once the retry budget is consulted.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Detection succeeded and found at least one face.
    Faces(Vec<FaceRecord>),
    /// Detection succeeded but the photo contains no faces.
    NoFaces,
    /// The attempt failed but the job may be retried.
    Retryable(AppError),
    /// The retry budget is exhausted; the job will not run again.
    Terminal(AppError),
}

impl ProcessOutcome {
    /// Whether this outcome ends the job's life in the queue.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Retryable(_))
    }
}
