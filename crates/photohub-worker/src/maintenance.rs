//! Periodic maintenance tasks for the face queue.
//!
//! Both tasks are spawned by [`FaceQueue::start`] and stop on the same
//! cancel signal as the scheduler loop.
//!
//! [`FaceQueue::start`]: crate::queue::FaceQueue::start

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::queue::QueueInner;

/// Evict accounting entries for users with nothing queued or processing
/// whose last activity is older than the idle TTL.
pub(crate) async fn run_eviction(
    inner: Arc<Mutex<QueueInner>>,
    interval_seconds: u64,
    idle_ttl_seconds: u64,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(Duration::from_secs(interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let cutoff = Utc::now() - chrono::Duration::seconds(idle_ttl_seconds as i64);
                let mut state = inner.lock().await;
                let before = state.users.len();
                state.users.retain(|_, user| {
                    user.queued > 0 || user.processing > 0 || user.last_activity >= cutoff
                });
                let evicted = before - state.users.len();
                if evicted > 0 {
                    debug!(evicted, remaining = state.users.len(), "Evicted idle user entries");
                }
            }
        }
    }
}

/// Log a queue summary line, but only while there is work in the system.
pub(crate) async fn run_stats(
    inner: Arc<Mutex<QueueInner>>,
    interval_seconds: u64,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(Duration::from_secs(interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let state = inner.lock().await;
                if state.pending.is_empty() && state.active.is_empty() {
                    continue;
                }
                info!(
                    pending = state.pending.len(),
                    active = state.active.len(),
                    users = state.users.len(),
                    completed = state.completed,
                    errors = state.errors,
                    avg_latency_ms = state.avg_latency_ms,
                    "Face queue statistics"
                );
            }
        }
    }
}
