//! Local rate-limiter sweep task.
//!
//! The in-process counter keeps one entry per key until swept. This task
//! removes windows whose reset time has passed so the map stays bounded by
//! the keys active in the last window.
//!
//! # Graceful Shutdown
//!
//! The task exits when its cancellation token is cancelled.

use crate::clock::Clock;
use crate::rate_limit::LocalCounterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Run the sweep loop every `interval` until `cancel_token` fires.
#[instrument(skip_all, name = "chat.task.limiter_sweep")]
pub async fn start_limiter_sweep(
    store: Arc<LocalCounterStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "chat.task.limiter_sweep",
        interval_seconds = interval.as_secs(),
        "Starting limiter sweep task"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_sweep(&store, clock.as_ref());
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "chat.task.limiter_sweep",
                    "Limiter sweep task received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

/// One sweep iteration. Returns the number of windows removed.
pub(crate) fn run_sweep(store: &LocalCounterStore, clock: &dyn Clock) -> usize {
    let removed = store.sweep_expired(clock.now());
    if removed > 0 {
        debug!(
            target: "chat.task.limiter_sweep",
            removed = removed,
            remaining = store.len(),
            "Swept expired rate-limit windows"
        );
    }
    removed
}
