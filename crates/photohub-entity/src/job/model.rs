//! Face-processing job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use photohub_core::types::{PhotoId, UserId};

use super::status::JobPriority;

/// One unit of background face-processing work.
///
/// The job is created at admission and discarded the moment processing
/// finishes; only `retry_count` and `enqueued_at` mutate in between, when
/// a failed attempt is re-queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceJob {
    /// Photo this job processes; unique across pending and active jobs.
    pub photo_id: PhotoId,
    /// Opaque reference handed to the detection service (path or URI).
    pub payload_ref: String,
    /// Submitting user, used for fairness and admission control.
    pub owner_id: UserId,
    /// Priority class.
    pub priority: JobPriority,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// When the job entered the pending queue (refreshed on re-enqueue).
    pub enqueued_at: DateTime<Utc>,
    /// Optional correlation token, passed through unchanged.
    pub session_ref: Option<String>,
}

impl FaceJob {
    /// Check whether another retry is allowed under the given limit.
    pub fn can_retry(&self, retry_limit: u32) -> bool {
        self.retry_count < retry_limit
    }
}
