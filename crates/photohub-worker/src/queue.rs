//! The face-processing queue service.
//!
//! One explicitly constructed instance owns all shared scheduling state:
//! the pending queue, the active-processing set, and per-user accounting.
//! Everything lives behind a single Tokio mutex; the lock is never held
//! across a collaborator call or a sleep.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use photohub_core::config::worker::WorkerConfig;
use photohub_core::types::{PhotoId, UserId};
use photohub_entity::job::{FaceJob, JobPriority};

use crate::collaborators::{ArtifactStore, FaceDetector, PhotoStore};
use crate::maintenance;
use crate::processor::JobProcessor;
use crate::scheduler;

/// How often (in jobs) admission logs at info level instead of debug.
const ADMISSION_LOG_EVERY: usize = 500;

/// Parameters for submitting a new face-processing job.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    /// Photo to process.
    pub photo_id: PhotoId,
    /// Opaque reference handed to the detection service.
    pub payload_ref: String,
    /// Submitting user.
    pub owner_id: UserId,
    /// Priority class.
    pub priority: JobPriority,
    /// Optional correlation token, passed through unchanged.
    pub session_ref: Option<String>,
}

/// Why a submission was turned away at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// The photo is already pending or actively processing.
    AlreadyQueued,
    /// The user has reached the per-user queue-depth ceiling.
    UserLimitExceeded,
}

/// Outcome of a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AdmissionResult {
    /// The job was queued at the given 1-based pending position.
    Accepted {
        /// 1-based position in the pending queue.
        position: usize,
    },
    /// The job was rejected; no state was mutated.
    Rejected {
        /// The rejection reason.
        reason: RejectReason,
    },
}

/// Snapshot of queue-wide state for operational monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Jobs waiting in the pending queue.
    pub pending: usize,
    /// Jobs currently being processed.
    pub active: usize,
    /// Whether the scheduler loop is running.
    pub running: bool,
    /// Configured global concurrency ceiling.
    pub global_concurrency: usize,
    /// Configured per-user concurrency ceiling.
    pub per_user_concurrency: usize,
    /// Distinct users currently tracked by accounting.
    pub active_users: usize,
    /// Cumulative jobs completed (success and terminal failure).
    pub completed: u64,
    /// Cumulative terminal failures.
    pub errors: u64,
    /// Running-average processing latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Completed jobs per elapsed minute since start.
    pub throughput_per_minute: f64,
    /// Seconds since the queue was constructed.
    pub uptime_seconds: u64,
}

/// Snapshot of one user's queue state.
#[derive(Debug, Clone, Serialize)]
pub struct UserStatus {
    /// Jobs this user has waiting in the pending queue.
    pub queued: usize,
    /// Jobs this user has actively processing.
    pub processing: usize,
    /// Configured per-user queue-depth ceiling.
    pub queue_limit: usize,
    /// Configured per-user concurrency ceiling.
    pub concurrency_limit: usize,
    /// 1-based position of this user's oldest pending job, if any.
    pub next_position: Option<usize>,
}

/// Live-tunable settings; omitted fields are left unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsUpdate {
    /// New global concurrency ceiling, clamped to [1, 10].
    pub global_concurrency: Option<usize>,
    /// New burst inter-iteration delay in milliseconds, clamped to [0, 1000].
    pub dispatch_delay_ms: Option<u64>,
    /// New retry limit, clamped to [0, 10].
    pub retry_limit: Option<u32>,
}

/// Bounds applied by [`FaceQueue::update_settings`].
const GLOBAL_CONCURRENCY_RANGE: (usize, usize) = (1, 10);
const DISPATCH_DELAY_MAX_MS: u64 = 1_000;
const RETRY_LIMIT_MAX: u32 = 10;

/// Queued/processing counts and activity timestamp for one user.
#[derive(Debug, Clone)]
pub(crate) struct UserAccounting {
    /// Jobs waiting in the pending queue.
    pub(crate) queued: usize,
    /// Jobs currently processing.
    pub(crate) processing: usize,
    /// Last time this user submitted, started, or finished a job.
    pub(crate) last_activity: DateTime<Utc>,
}

impl UserAccounting {
    pub(crate) fn new() -> Self {
        Self {
            queued: 0,
            processing: 0,
            last_activity: Utc::now(),
        }
    }
}

/// Runtime-tunable scheduling parameters.
#[derive(Debug, Clone)]
pub(crate) struct QueueSettings {
    /// Maximum jobs processing at once across all users.
    pub(crate) global_concurrency: usize,
    /// Maximum jobs processing at once for one user.
    pub(crate) per_user_concurrency: usize,
    /// Maximum jobs one user may have queued.
    pub(crate) per_user_queue_limit: usize,
    /// Maximum retries for a failed job.
    pub(crate) retry_limit: u32,
    /// Base backoff delay in milliseconds.
    pub(crate) backoff_base_ms: u64,
    /// Backoff delay cap in milliseconds.
    pub(crate) backoff_max_ms: u64,
    /// Inter-iteration delay in milliseconds under burst load.
    pub(crate) dispatch_delay_ms: u64,
}

impl QueueSettings {
    fn from_config(config: &WorkerConfig) -> Self {
        Self {
            global_concurrency: config.global_concurrency,
            per_user_concurrency: config.per_user_concurrency,
            per_user_queue_limit: config.per_user_queue_limit,
            retry_limit: config.retry_limit,
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
            dispatch_delay_ms: config.dispatch_delay_ms,
        }
    }
}

/// All shared scheduling state, guarded by one mutex.
#[derive(Debug)]
pub(crate) struct QueueInner {
    /// Pending jobs, kept sorted by priority weight then arrival order.
    pub(crate) pending: Vec<FaceJob>,
    /// Actively processing jobs and their owners.
    pub(crate) active: HashMap<PhotoId, UserId>,
    /// Per-user accounting, one entry per user seen.
    pub(crate) users: HashMap<UserId, UserAccounting>,
    /// Runtime-tunable settings.
    pub(crate) settings: QueueSettings,
    /// Whether the scheduler loop may select new batches.
    pub(crate) running: bool,
    /// Cumulative finished jobs (success and terminal failure).
    pub(crate) completed: u64,
    /// Cumulative terminal failures.
    pub(crate) errors: u64,
    /// Running-average processing latency in milliseconds.
    pub(crate) avg_latency_ms: f64,
    /// When this queue instance was constructed.
    pub(crate) started_at: DateTime<Utc>,
}

impl QueueInner {
    fn new(config: &WorkerConfig) -> Self {
        Self {
            pending: Vec::new(),
            active: HashMap::new(),
            users: HashMap::new(),
            settings: QueueSettings::from_config(config),
            running: true,
            completed: 0,
            errors: 0,
            avg_latency_ms: 0.0,
            started_at: Utc::now(),
        }
    }

    /// Insert a job before the first pending job of strictly lower priority.
    ///
    /// Equal-priority jobs keep arrival order, giving FIFO within a class.
    /// O(n), acceptable because admission control bounds the depth.
    pub(crate) fn insert_pending(&mut self, job: FaceJob) {
        let weight = job.priority.weight();
        let at = self
            .pending
            .iter()
            .position(|queued| queued.priority.weight() > weight)
            .unwrap_or(self.pending.len());
        self.pending.insert(at, job);
    }

    /// 1-based pending position of a photo, if it is pending at all.
    pub(crate) fn position_of(&self, photo_id: PhotoId) -> Option<usize> {
        self.pending
            .iter()
            .position(|job| job.photo_id == photo_id)
            .map(|index| index + 1)
    }

    /// Whether a photo is anywhere in the live queue.
    pub(crate) fn contains(&self, photo_id: PhotoId) -> bool {
        self.active.contains_key(&photo_id)
            || self.pending.iter().any(|job| job.photo_id == photo_id)
    }

    /// Pull up to `max_items` admissible jobs off the front of the queue.
    ///
    /// A pending job is admissible when its owner's in-flight count
    /// (active plus already selected this pass) is below the per-user
    /// concurrency ceiling. Inadmissible jobs are skipped in place so one
    /// high-volume user cannot monopolize the global slots. Selected jobs
    /// move into the active set in the same critical section, so they can
    /// never be selected twice.
    pub(crate) fn next_batch(&mut self, max_items: usize) -> Vec<FaceJob> {
        let mut in_flight: HashMap<UserId, usize> = HashMap::new();
        for owner in self.active.values() {
            *in_flight.entry(*owner).or_insert(0) += 1;
        }

        let ceiling = self.settings.per_user_concurrency;
        let mut selected = Vec::new();
        let mut index = 0;

        while index < self.pending.len() && selected.len() < max_items {
            let owner = self.pending[index].owner_id;
            if in_flight.get(&owner).copied().unwrap_or(0) < ceiling {
                let job = self.pending.remove(index);
                *in_flight.entry(owner).or_insert(0) += 1;
                self.active.insert(job.photo_id, owner);
                if let Some(user) = self.users.get_mut(&owner) {
                    user.queued = user.queued.saturating_sub(1);
                    user.processing += 1;
                    user.last_activity = Utc::now();
                }
                selected.push(job);
            } else {
                index += 1;
            }
        }

        selected
    }

    /// Fold one finished attempt's latency into the running average.
    pub(crate) fn record_completion(&mut self, latency_ms: f64, terminal_failure: bool) {
        let done = self.completed as f64;
        self.avg_latency_ms = (self.avg_latency_ms * done + latency_ms) / (done + 1.0);
        self.completed += 1;
        if terminal_failure {
            self.errors += 1;
        }
    }
}

/// The background face-processing queue.
///
/// Construct one per process at the composition root, with the detection,
/// storage, and artifact collaborators injected. Call [`FaceQueue::start`]
/// to spawn the scheduler loop and maintenance tasks, [`FaceQueue::stop`]
/// to wind them down (in-flight jobs finish).
#[derive(Debug)]
pub struct FaceQueue {
    pub(crate) inner: Arc<Mutex<QueueInner>>,
    pub(crate) processor: Arc<JobProcessor>,
    pub(crate) config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl FaceQueue {
    /// Create a new queue with injected collaborators. Does not start it.
    pub fn new(
        config: WorkerConfig,
        detector: Arc<dyn FaceDetector>,
        store: Arc<dyn PhotoStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        let inner = Arc::new(Mutex::new(QueueInner::new(&config)));
        let processor = Arc::new(JobProcessor::new(
            Arc::clone(&inner),
            detector,
            store,
            artifacts,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner,
            processor,
            config,
            shutdown_tx,
        }
    }

    /// Subscribe to the shutdown signal shared by all background tasks.
    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn the scheduler loop and both maintenance tasks.
    pub fn start(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        let cancel = self.shutdown_rx();
        tokio::spawn(scheduler::run(queue, cancel));

        tokio::spawn(maintenance::run_eviction(
            Arc::clone(&self.inner),
            self.config.eviction_interval_seconds,
            self.config.idle_owner_ttl_seconds,
            self.shutdown_rx(),
        ));
        tokio::spawn(maintenance::run_stats(
            Arc::clone(&self.inner),
            self.config.stats_interval_seconds,
            self.shutdown_rx(),
        ));

        info!(
            global_concurrency = self.config.global_concurrency,
            per_user_concurrency = self.config.per_user_concurrency,
            "Face queue started"
        );
    }

    /// Submit a job for processing.
    ///
    /// Never blocks on processing; the result reports only the admission
    /// decision. Duplicate photos and over-quota users are rejected with
    /// no state mutated.
    pub async fn submit(&self, params: SubmitJob) -> AdmissionResult {
        let mut inner = self.inner.lock().await;

        if inner.contains(params.photo_id) {
            debug!(photo_id = %params.photo_id, "Rejected duplicate submission");
            return AdmissionResult::Rejected {
                reason: RejectReason::AlreadyQueued,
            };
        }

        let queued = inner
            .users
            .get(&params.owner_id)
            .map(|user| user.queued)
            .unwrap_or(0);
        if queued >= inner.settings.per_user_queue_limit {
            debug!(
                owner_id = %params.owner_id,
                queued,
                "Rejected submission over per-user queue limit"
            );
            return AdmissionResult::Rejected {
                reason: RejectReason::UserLimitExceeded,
            };
        }

        let job = FaceJob {
            photo_id: params.photo_id,
            payload_ref: params.payload_ref,
            owner_id: params.owner_id,
            priority: params.priority,
            retry_count: 0,
            enqueued_at: Utc::now(),
            session_ref: params.session_ref,
        };

        let user = inner
            .users
            .entry(params.owner_id)
            .or_insert_with(UserAccounting::new);
        user.queued += 1;
        user.last_activity = Utc::now();
        let user_queued = user.queued;

        inner.insert_pending(job);
        let position = inner
            .position_of(params.photo_id)
            .unwrap_or(inner.pending.len());
        let depth = inner.pending.len();

        // The queue absorbs bulk uploads, so log loudly only at thresholds.
        if depth % ADMISSION_LOG_EVERY == 0 || user_queued % ADMISSION_LOG_EVERY == 0 {
            info!(
                photo_id = %params.photo_id,
                owner_id = %params.owner_id,
                depth,
                user_queued,
                "Face queue depth threshold crossed"
            );
        } else {
            debug!(
                photo_id = %params.photo_id,
                owner_id = %params.owner_id,
                priority = %params.priority,
                position,
                "Queued photo for face processing"
            );
        }

        AdmissionResult::Accepted { position }
    }

    /// Snapshot queue-wide state.
    pub async fn global_status(&self) -> QueueStatus {
        let inner = self.inner.lock().await;
        let uptime_seconds = (Utc::now() - inner.started_at).num_seconds().max(0) as u64;
        let elapsed_minutes = (Utc::now() - inner.started_at).num_milliseconds() as f64 / 60_000.0;
        let throughput_per_minute = if elapsed_minutes > 0.0 {
            inner.completed as f64 / elapsed_minutes
        } else {
            0.0
        };

        QueueStatus {
            pending: inner.pending.len(),
            active: inner.active.len(),
            running: inner.running,
            global_concurrency: inner.settings.global_concurrency,
            per_user_concurrency: inner.settings.per_user_concurrency,
            active_users: inner.users.len(),
            completed: inner.completed,
            errors: inner.errors,
            avg_latency_ms: inner.avg_latency_ms,
            throughput_per_minute,
            uptime_seconds,
        }
    }

    /// Snapshot one user's queue state.
    pub async fn user_status(&self, owner_id: UserId) -> UserStatus {
        let inner = self.inner.lock().await;
        let (queued, processing) = inner
            .users
            .get(&owner_id)
            .map(|user| (user.queued, user.processing))
            .unwrap_or((0, 0));

        // First match in queue order is the user's oldest admissible job.
        let next_position = inner
            .pending
            .iter()
            .position(|job| job.owner_id == owner_id)
            .map(|index| index + 1);

        UserStatus {
            queued,
            processing,
            queue_limit: inner.settings.per_user_queue_limit,
            concurrency_limit: inner.settings.per_user_concurrency,
            next_position,
        }
    }

    /// Apply a partial settings update, clamping each value into its safe
    /// operating range. Takes effect on the next loop iteration; in-flight
    /// jobs are unaffected.
    pub async fn update_settings(&self, update: SettingsUpdate) {
        let mut inner = self.inner.lock().await;

        if let Some(value) = update.global_concurrency {
            inner.settings.global_concurrency =
                value.clamp(GLOBAL_CONCURRENCY_RANGE.0, GLOBAL_CONCURRENCY_RANGE.1);
        }
        if let Some(value) = update.dispatch_delay_ms {
            inner.settings.dispatch_delay_ms = value.min(DISPATCH_DELAY_MAX_MS);
        }
        if let Some(value) = update.retry_limit {
            inner.settings.retry_limit = value.min(RETRY_LIMIT_MAX);
        }

        info!(
            global_concurrency = inner.settings.global_concurrency,
            dispatch_delay_ms = inner.settings.dispatch_delay_ms,
            retry_limit = inner.settings.retry_limit,
            "Queue settings updated"
        );
    }

    /// Stop the scheduler loop and maintenance tasks.
    ///
    /// Non-preemptive: already-dispatched jobs run to completion, but no
    /// new batches are selected.
    pub async fn stop(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.running = false;
        }
        let _ = self.shutdown_tx.send(true);
        info!("Face queue stopped");
    }
}
