//! Job processor — runs one face-processing job to a terminal outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, warn};

use photohub_core::AppError;
use photohub_entity::job::{FaceJob, ProcessOutcome};

use crate::collaborators::{ArtifactStore, FaceDetector, PhotoStore};
use crate::queue::{QueueInner, UserAccounting};

/// A failed attempt, tagged with the stage that failed.
///
/// The stage decides the terminal path: a detection failure still gets
/// force-marked processed, a store failure does not (the store already
/// rejected a mark this attempt).
#[derive(Debug)]
enum AttemptFailure {
    Detect(AppError),
    Persist(AppError),
}

impl AttemptFailure {
    fn into_cause(self) -> AppError {
        match self {
            Self::Detect(cause) | Self::Persist(cause) => cause,
        }
    }
}

/// Executes dispatched jobs against the injected collaborators.
///
/// One processor instance is shared by all in-flight job tasks; it holds
/// no per-job state of its own.
#[derive(Debug)]
pub(crate) struct JobProcessor {
    inner: Arc<Mutex<QueueInner>>,
    detector: Arc<dyn FaceDetector>,
    store: Arc<dyn PhotoStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl JobProcessor {
    pub(crate) fn new(
        inner: Arc<Mutex<QueueInner>>,
        detector: Arc<dyn FaceDetector>,
        store: Arc<dyn PhotoStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            inner,
            detector,
            store,
            artifacts,
        }
    }

    /// Run one job to its outcome and settle the shared state afterwards.
    ///
    /// The job is already in the active set when this is called (moved
    /// there by batch selection). Whatever happens during the attempt, the
    /// job leaves the active set and the owner's processing count drops by
    /// one before this function returns.
    pub(crate) async fn process(self: Arc<Self>, job: FaceJob) {
        let started = Instant::now();
        debug!(
            photo_id = %job.photo_id,
            attempt = job.retry_count + 1,
            "Processing photo"
        );

        let outcome = match self.attempt(&job).await {
            Ok(outcome) => outcome,
            Err(failure) => self.classify(failure, &job).await,
        };
        let latency_ms = started.elapsed().as_millis() as f64;

        {
            let mut inner = self.inner.lock().await;
            inner.active.remove(&job.photo_id);
            if let Some(user) = inner.users.get_mut(&job.owner_id) {
                user.processing = user.processing.saturating_sub(1);
                user.last_activity = Utc::now();
            }

            match &outcome {
                ProcessOutcome::Faces(faces) => {
                    inner.record_completion(latency_ms, false);
                    debug!(
                        photo_id = %job.photo_id,
                        faces = faces.len(),
                        latency_ms,
                        "Photo processed"
                    );
                }
                ProcessOutcome::NoFaces => {
                    inner.record_completion(latency_ms, false);
                    debug!(photo_id = %job.photo_id, latency_ms, "Photo processed, no faces");
                }
                ProcessOutcome::Terminal(cause) => {
                    inner.record_completion(latency_ms, true);
                    error!(
                        photo_id = %job.photo_id,
                        retry_count = job.retry_count,
                        error = %cause,
                        "Photo failed permanently, marked processed without faces"
                    );
                }
                ProcessOutcome::Retryable(_) => {}
            }
        }

        if let ProcessOutcome::Retryable(cause) = outcome {
            self.schedule_retry(job, cause).await;
        }
    }

    /// One detection-and-store pass. Failures come back tagged with the
    /// stage that failed; the retry budget is consulted afterwards.
    async fn attempt(&self, job: &FaceJob) -> Result<ProcessOutcome, AttemptFailure> {
        let faces = match self.detector.detect(&job.payload_ref).await {
            Ok(faces) => faces,
            Err(cause) => return Err(AttemptFailure::Detect(cause)),
        };

        let stored = if faces.is_empty() {
            self.store.mark_processed(job.photo_id, None).await
        } else {
            self.store
                .mark_processed(job.photo_id, Some(faces.clone()))
                .await
        };
        if let Err(cause) = stored {
            return Err(AttemptFailure::Persist(cause));
        }

        // Cleanup is best effort; a leftover artifact never fails the job.
        if let Err(cause) = self.artifacts.remove(&job.payload_ref).await {
            warn!(
                photo_id = %job.photo_id,
                payload_ref = %job.payload_ref,
                error = %cause,
                "Failed to clean up transient artifact"
            );
        }

        if faces.is_empty() {
            Ok(ProcessOutcome::NoFaces)
        } else {
            Ok(ProcessOutcome::Faces(faces))
        }
    }

    /// Downgrade a failed attempt to terminal once the budget is spent.
    ///
    /// A terminally failed detection is still marked processed (without
    /// face data) so upstream consumers are not left waiting forever. When
    /// the final failure was in the store itself the extra mark is
    /// skipped, keeping store calls bounded by one per attempt.
    async fn classify(&self, failure: AttemptFailure, job: &FaceJob) -> ProcessOutcome {
        let retry_limit = self.inner.lock().await.settings.retry_limit;
        if job.can_retry(retry_limit) {
            return ProcessOutcome::Retryable(failure.into_cause());
        }

        match failure {
            AttemptFailure::Detect(cause) => {
                if let Err(mark_err) = self.store.mark_processed(job.photo_id, None).await {
                    error!(
                        photo_id = %job.photo_id,
                        error = %mark_err,
                        "Failed to force-mark photo after exhausted retries"
                    );
                }
                ProcessOutcome::Terminal(cause)
            }
            AttemptFailure::Persist(cause) => ProcessOutcome::Terminal(cause),
        }
    }

    /// Re-queue a failed job after an exponential backoff delay.
    async fn schedule_retry(&self, mut job: FaceJob, cause: AppError) {
        let delay_ms = {
            let inner = self.inner.lock().await;
            let exponent = job.retry_count.min(16);
            inner
                .settings
                .backoff_base_ms
                .saturating_mul(1u64 << exponent)
                .min(inner.settings.backoff_max_ms)
        };

        warn!(
            photo_id = %job.photo_id,
            retry_count = job.retry_count,
            delay_ms,
            error = %cause,
            "Photo processing failed, retrying after backoff"
        );

        job.retry_count += 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;

            let mut state = inner.lock().await;
            // The photo may have been resubmitted while this retry slept;
            // re-inserting would break the one-job-per-photo invariant.
            if state.contains(job.photo_id) {
                warn!(
                    photo_id = %job.photo_id,
                    "Dropping retry for photo resubmitted during backoff"
                );
                return;
            }

            job.enqueued_at = Utc::now();
            let user = state
                .users
                .entry(job.owner_id)
                .or_insert_with(UserAccounting::new);
            user.queued += 1;
            user.last_activity = Utc::now();
            state.insert_pending(job);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use photohub_core::config::worker::WorkerConfig;
    use photohub_core::types::{PhotoId, UserId};
    use photohub_core::AppResult;
    use photohub_entity::face::{FaceBounds, FaceRecord};
    use photohub_entity::job::JobPriority;

    use crate::collaborators::tests::NullArtifacts;
    use crate::queue::FaceQueue;

    fn one_face() -> FaceRecord {
        FaceRecord {
            embedding: vec![0.5; 4],
            confidence: 0.9,
            bounds: FaceBounds {
                x: 0,
                y: 0,
                width: 32,
                height: 32,
            },
        }
    }

    #[derive(Debug)]
    struct FixedDetector {
        faces: Vec<FaceRecord>,
    }

    #[async_trait]
    impl crate::collaborators::FaceDetector for FixedDetector {
        async fn detect(&self, _payload_ref: &str) -> AppResult<Vec<FaceRecord>> {
            Ok(self.faces.clone())
        }
    }

    #[derive(Debug, Default)]
    struct FailingDetector;

    #[async_trait]
    impl crate::collaborators::FaceDetector for FailingDetector {
        async fn detect(&self, _payload_ref: &str) -> AppResult<Vec<FaceRecord>> {
            Err(photohub_core::AppError::detection("model unavailable"))
        }
    }

    /// Records every `mark_processed` call as the number of faces attached.
    #[derive(Debug, Default)]
    struct RecordingStore {
        calls: StdMutex<Vec<Option<usize>>>,
    }

    impl RecordingStore {
        fn calls(&self) -> Vec<Option<usize>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl crate::collaborators::PhotoStore for RecordingStore {
        async fn mark_processed(
            &self,
            _photo_id: PhotoId,
            faces: Option<Vec<FaceRecord>>,
        ) -> AppResult<()> {
            self.calls.lock().unwrap().push(faces.map(|f| f.len()));
            Ok(())
        }
    }

    /// Store that rejects every call, counting how many arrive.
    #[derive(Debug, Default)]
    struct FailingStore {
        calls: StdMutex<usize>,
    }

    impl FailingStore {
        fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl crate::collaborators::PhotoStore for FailingStore {
        async fn mark_processed(
            &self,
            _photo_id: PhotoId,
            _faces: Option<Vec<FaceRecord>>,
        ) -> AppResult<()> {
            *self.calls.lock().unwrap() += 1;
            Err(photohub_core::AppError::storage("write rejected"))
        }
    }

    #[derive(Debug, Default)]
    struct RecordingArtifacts {
        removed: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl crate::collaborators::ArtifactStore for RecordingArtifacts {
        async fn remove(&self, payload_ref: &str) -> AppResult<()> {
            self.removed.lock().unwrap().push(payload_ref.to_string());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FailingArtifacts;

    #[async_trait]
    impl crate::collaborators::ArtifactStore for FailingArtifacts {
        async fn remove(&self, _payload_ref: &str) -> AppResult<()> {
            Err(photohub_core::AppError::storage("permission denied"))
        }
    }

    fn make_job(owner_id: UserId) -> FaceJob {
        FaceJob {
            photo_id: PhotoId::new(),
            payload_ref: "/uploads/tmp/photo.jpg".to_string(),
            owner_id,
            priority: JobPriority::Normal,
            retry_count: 0,
            enqueued_at: Utc::now(),
            session_ref: None,
        }
    }

    /// Put the job into the state batch selection would leave it in.
    async fn mark_selected(queue: &FaceQueue, job: &FaceJob) {
        let mut inner = queue.inner.lock().await;
        inner.active.insert(job.photo_id, job.owner_id);
        let user = inner
            .users
            .entry(job.owner_id)
            .or_insert_with(UserAccounting::new);
        user.processing += 1;
    }

    #[tokio::test]
    async fn test_success_marks_processed_with_faces_and_cleans_up() {
        let store = Arc::new(RecordingStore::default());
        let artifacts = Arc::new(RecordingArtifacts::default());
        let queue = FaceQueue::new(
            WorkerConfig::default(),
            Arc::new(FixedDetector {
                faces: vec![one_face(), one_face()],
            }),
            store.clone(),
            artifacts.clone(),
        );

        let job = make_job(UserId::new());
        mark_selected(&queue, &job).await;
        Arc::clone(&queue.processor).process(job.clone()).await;

        assert_eq!(store.calls(), vec![Some(2)]);
        assert_eq!(
            artifacts.removed.lock().unwrap().clone(),
            vec![job.payload_ref.clone()]
        );

        let status = queue.global_status().await;
        assert_eq!(status.completed, 1);
        assert_eq!(status.errors, 0);
        assert_eq!(status.active, 0);
    }

    #[tokio::test]
    async fn test_no_faces_is_a_valid_outcome() {
        let store = Arc::new(RecordingStore::default());
        let queue = FaceQueue::new(
            WorkerConfig::default(),
            Arc::new(FixedDetector { faces: Vec::new() }),
            store.clone(),
            Arc::new(NullArtifacts),
        );

        let job = make_job(UserId::new());
        mark_selected(&queue, &job).await;
        Arc::clone(&queue.processor).process(job).await;

        assert_eq!(store.calls(), vec![None]);
        let status = queue.global_status().await;
        assert_eq!(status.completed, 1);
        assert_eq!(status.errors, 0);
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_fail_the_job() {
        let store = Arc::new(RecordingStore::default());
        let queue = FaceQueue::new(
            WorkerConfig::default(),
            Arc::new(FixedDetector {
                faces: vec![one_face()],
            }),
            store.clone(),
            Arc::new(FailingArtifacts),
        );

        let job = make_job(UserId::new());
        mark_selected(&queue, &job).await;
        Arc::clone(&queue.processor).process(job).await;

        assert_eq!(store.calls(), vec![Some(1)]);
        assert_eq!(queue.global_status().await.completed, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_force_mark_and_count_error() {
        let store = Arc::new(RecordingStore::default());
        let config = WorkerConfig {
            retry_limit: 0,
            ..WorkerConfig::default()
        };
        let queue = FaceQueue::new(
            config,
            Arc::new(FailingDetector),
            store.clone(),
            Arc::new(NullArtifacts),
        );

        let owner = UserId::new();
        let job = make_job(owner);
        mark_selected(&queue, &job).await;
        Arc::clone(&queue.processor).process(job.clone()).await;

        // Force-marked exactly once, without face data.
        assert_eq!(store.calls(), vec![None]);

        let status = queue.global_status().await;
        assert_eq!(status.completed, 1);
        assert_eq!(status.errors, 1);
        assert_eq!(status.pending, 0);

        // Finalizer guarantee holds on the failure path too.
        let inner = queue.inner.lock().await;
        assert!(!inner.active.contains_key(&job.photo_id));
        assert_eq!(inner.users.get(&owner).unwrap().processing, 0);
    }

    #[tokio::test]
    async fn test_terminal_store_failure_skips_redundant_force_mark() {
        let store = Arc::new(FailingStore::default());
        let config = WorkerConfig {
            retry_limit: 0,
            ..WorkerConfig::default()
        };
        let queue = FaceQueue::new(
            config,
            Arc::new(FixedDetector {
                faces: vec![one_face()],
            }),
            store.clone(),
            Arc::new(NullArtifacts),
        );

        let job = make_job(UserId::new());
        mark_selected(&queue, &job).await;
        Arc::clone(&queue.processor).process(job.clone()).await;

        // The failed attempt reached the store once; no force-mark follows
        // when the store itself was what failed.
        assert_eq!(store.call_count(), 1);

        let status = queue.global_status().await;
        assert_eq!(status.completed, 1);
        assert_eq!(status.errors, 1);
        assert_eq!(status.pending, 0);
        assert_eq!(status.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_requeues_after_backoff() {
        let store = Arc::new(RecordingStore::default());
        let config = WorkerConfig {
            retry_limit: 3,
            backoff_base_ms: 1_000,
            ..WorkerConfig::default()
        };
        let queue = FaceQueue::new(
            config,
            Arc::new(FailingDetector),
            store.clone(),
            Arc::new(NullArtifacts),
        );

        let job = make_job(UserId::new());
        mark_selected(&queue, &job).await;
        Arc::clone(&queue.processor).process(job.clone()).await;

        // Not yet re-queued: the backoff task is still sleeping.
        {
            let inner = queue.inner.lock().await;
            assert!(inner.pending.is_empty());
            assert!(!inner.active.contains_key(&job.photo_id));
        }
        assert_eq!(store.calls(), Vec::<Option<usize>>::new());
        assert_eq!(queue.global_status().await.completed, 0);

        sleep(Duration::from_millis(1_100)).await;

        let inner = queue.inner.lock().await;
        assert_eq!(inner.pending.len(), 1);
        assert_eq!(inner.pending[0].photo_id, job.photo_id);
        assert_eq!(inner.pending[0].retry_count, 1);
        assert_eq!(inner.pending[0].priority, job.priority);
        assert_eq!(inner.users.get(&job.owner_id).unwrap().queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_dropped_when_photo_resubmitted_during_backoff() {
        let config = WorkerConfig {
            retry_limit: 3,
            backoff_base_ms: 1_000,
            ..WorkerConfig::default()
        };
        let queue = FaceQueue::new(
            config,
            Arc::new(FailingDetector),
            Arc::new(RecordingStore::default()),
            Arc::new(NullArtifacts),
        );

        let job = make_job(UserId::new());
        mark_selected(&queue, &job).await;
        Arc::clone(&queue.processor).process(job.clone()).await;

        // Same photo comes back through admission while the retry sleeps.
        let resubmitted = crate::queue::SubmitJob {
            photo_id: job.photo_id,
            payload_ref: job.payload_ref.clone(),
            owner_id: job.owner_id,
            priority: JobPriority::High,
            session_ref: None,
        };
        assert!(matches!(
            queue.submit(resubmitted).await,
            crate::queue::AdmissionResult::Accepted { .. }
        ));

        sleep(Duration::from_millis(1_100)).await;

        let inner = queue.inner.lock().await;
        assert_eq!(inner.pending.len(), 1);
        assert_eq!(inner.pending[0].retry_count, 0);
    }
}
