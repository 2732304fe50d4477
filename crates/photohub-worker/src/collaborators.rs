//! Contracts for the external services the queue drives.
//!
//! The queue treats all three as black boxes: they may be slow, they may
//! fail, and they may be called concurrently from multiple in-flight job
//! tasks. None of them are assumed to serialize access internally.

use async_trait::async_trait;

use photohub_core::types::PhotoId;
use photohub_core::AppResult;
use photohub_entity::face::FaceRecord;

/// The face-detection service.
///
/// Any error (including timeouts surfaced as errors) is treated as a
/// retryable failure by the processor.
#[async_trait]
pub trait FaceDetector: Send + Sync + std::fmt::Debug {
    /// Detect faces in the photo behind `payload_ref`.
    async fn detect(&self, payload_ref: &str) -> AppResult<Vec<FaceRecord>>;
}

/// Persistent photo storage.
#[async_trait]
pub trait PhotoStore: Send + Sync + std::fmt::Debug {
    /// Mark the photo processed, attaching detected faces when present.
    ///
    /// `None` records "processed, no faces". Implementations must be
    /// idempotent: retries may call this more than once per photo.
    async fn mark_processed(
        &self,
        photo_id: PhotoId,
        faces: Option<Vec<FaceRecord>>,
    ) -> AppResult<()>;
}

/// Transient artifact store for local upload leftovers.
#[async_trait]
pub trait ArtifactStore: Send + Sync + std::fmt::Debug {
    /// Remove the transient artifact behind `payload_ref`, best effort.
    async fn remove(&self, payload_ref: &str) -> AppResult<()>;
}
