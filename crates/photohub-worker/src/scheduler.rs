//! Scheduler loop — pulls admissible batches and dispatches them.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, Duration};
use tracing::{error, info};

use crate::queue::FaceQueue;

/// What one loop iteration did.
enum Tick {
    /// The queue was stopped; the loop should exit.
    Stopped,
    /// No slots or no admissible jobs; sleep before the next pass.
    Idle,
    /// Jobs were dispatched.
    Dispatched {
        /// Pending depth was over the high-water mark at dispatch time.
        burst: bool,
        /// Configured inter-iteration delay for burst conditions.
        delay_ms: u64,
    },
}

/// The control loop. Runs until the cancel signal fires or the running
/// flag is cleared; a panicking iteration cools down instead of killing
/// the loop.
pub(crate) async fn run(queue: Arc<FaceQueue>, mut cancel: watch::Receiver<bool>) {
    let poll = Duration::from_millis(queue.config.poll_interval_ms);
    let cooldown = Duration::from_millis(queue.config.error_cooldown_ms);

    info!(
        poll_interval_ms = queue.config.poll_interval_ms,
        "Scheduler loop started"
    );

    loop {
        if *cancel.borrow() {
            break;
        }

        // Each pass runs as its own task so a panic surfaces as a
        // JoinError here rather than tearing the loop down.
        match tokio::spawn(tick(Arc::clone(&queue))).await {
            Ok(Tick::Stopped) => break,
            Ok(Tick::Idle) => sleep_or_cancel(&mut cancel, poll).await,
            Ok(Tick::Dispatched { burst, delay_ms }) => {
                // Only pause under burst load; otherwise iterate immediately
                // so a short queue drains at full concurrency.
                if burst && delay_ms > 0 {
                    sleep_or_cancel(&mut cancel, Duration::from_millis(delay_ms)).await;
                }
            }
            Err(e) => {
                error!(error = %e, "Scheduler iteration panicked, cooling down");
                sleep_or_cancel(&mut cancel, cooldown).await;
            }
        }
    }

    info!("Scheduler loop stopped");
}

/// One pass: compute free slots, select a batch, dispatch it.
///
/// The lock is released before any job task is spawned; dispatched jobs
/// are never awaited here.
async fn tick(queue: Arc<FaceQueue>) -> Tick {
    let (batch, burst, delay_ms) = {
        let mut inner = queue.inner.lock().await;
        if !inner.running {
            return Tick::Stopped;
        }

        let slots = inner
            .settings
            .global_concurrency
            .saturating_sub(inner.active.len());
        if slots == 0 {
            return Tick::Idle;
        }

        let batch = inner.next_batch(slots);
        if batch.is_empty() {
            return Tick::Idle;
        }

        let burst = inner.pending.len() > queue.config.high_water_mark;
        (batch, burst, inner.settings.dispatch_delay_ms)
    };

    for job in batch {
        let processor = Arc::clone(&queue.processor);
        tokio::spawn(processor.process(job));
    }

    Tick::Dispatched { burst, delay_ms }
}

/// Sleep for `duration`, waking early if the cancel signal fires.
async fn sleep_or_cancel(cancel: &mut watch::Receiver<bool>, duration: Duration) {
    tokio::select! {
        _ = cancel.changed() => {}
        _ = time::sleep(duration) => {}
    }
}
