//! Background face-processing queue configuration.

use serde::{Deserialize, Serialize};

/// Face-processing queue configuration.
///
/// Concurrency and retry values can later be tuned at runtime through the
/// queue's settings API; the values here are the ones the queue starts with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of photos processed concurrently across all users.
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    /// Maximum number of one user's photos processed concurrently.
    #[serde(default = "default_per_user_concurrency")]
    pub per_user_concurrency: usize,
    /// Maximum number of jobs a single user may have queued at once.
    #[serde(default = "default_per_user_queue_limit")]
    pub per_user_queue_limit: usize,
    /// Maximum number of retries for a failed job.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Base retry backoff delay in milliseconds (doubles per attempt).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on the retry backoff delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Idle sleep in milliseconds when no slots or no admissible jobs exist.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Inter-iteration delay in milliseconds applied under burst load.
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,
    /// Pending depth above which the inter-iteration delay kicks in.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    /// Cooldown sleep in milliseconds after an unexpected scheduler error.
    #[serde(default = "default_error_cooldown_ms")]
    pub error_cooldown_ms: u64,
    /// Seconds a user entry may stay idle before eviction.
    #[serde(default = "default_idle_owner_ttl_seconds")]
    pub idle_owner_ttl_seconds: u64,
    /// Interval in seconds between idle-user eviction sweeps.
    #[serde(default = "default_eviction_interval_seconds")]
    pub eviction_interval_seconds: u64,
    /// Interval in seconds between statistics log lines.
    #[serde(default = "default_stats_interval_seconds")]
    pub stats_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            global_concurrency: default_global_concurrency(),
            per_user_concurrency: default_per_user_concurrency(),
            per_user_queue_limit: default_per_user_queue_limit(),
            retry_limit: default_retry_limit(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            dispatch_delay_ms: default_dispatch_delay_ms(),
            high_water_mark: default_high_water_mark(),
            error_cooldown_ms: default_error_cooldown_ms(),
            idle_owner_ttl_seconds: default_idle_owner_ttl_seconds(),
            eviction_interval_seconds: default_eviction_interval_seconds(),
            stats_interval_seconds: default_stats_interval_seconds(),
        }
    }
}

fn default_global_concurrency() -> usize {
    10
}

fn default_per_user_concurrency() -> usize {
    10
}

fn default_per_user_queue_limit() -> usize {
    50_000
}

fn default_retry_limit() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_dispatch_delay_ms() -> u64 {
    50
}

fn default_high_water_mark() -> usize {
    1_000
}

fn default_error_cooldown_ms() -> u64 {
    5_000
}

fn default_idle_owner_ttl_seconds() -> u64 {
    600
}

fn default_eviction_interval_seconds() -> u64 {
    300
}

fn default_stats_interval_seconds() -> u64 {
    60
}
