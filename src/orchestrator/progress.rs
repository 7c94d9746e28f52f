//! Background progress reporting.

use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of a run, written only by the collection loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Distinct items in the run
    pub total: usize,
    /// Tasks that reached a terminal state
    pub finished: usize,
    /// Finished tasks that succeeded
    pub succeeded: usize,
    /// Finished tasks that failed
    pub failed: usize,
}

impl ProgressSnapshot {
    /// Tasks spawned but not yet terminal
    pub fn live(&self) -> usize {
        self.total.saturating_sub(self.finished)
    }

    /// Whether every task has reported
    pub fn is_complete(&self) -> bool {
        self.finished >= self.total
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} live, {} ok, {} failed",
            self.finished,
            self.total,
            self.live(),
            self.succeeded,
            self.failed
        )
    }
}

/// Spawn a background task that periodically logs run progress.
///
/// The reporter only reads the watch channel; it can never influence the
/// tasks it observes. It stops when `stop` is cancelled or the sender is
/// dropped, and returns how many lines it emitted.
pub(crate) fn spawn_progress_reporter(
    mut progress_rx: watch::Receiver<ProgressSnapshot>,
    interval: Duration,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately; nothing useful to report yet
        ticker.tick().await;

        let mut emitted = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = *progress_rx.borrow_and_update();
                    tracing::info!(
                        finished = snapshot.finished,
                        total = snapshot.total,
                        live = snapshot.live(),
                        succeeded = snapshot.succeeded,
                        failed = snapshot.failed,
                        elapsed_secs = started.elapsed().as_secs(),
                        "{}",
                        snapshot
                    );
                    emitted += 1;
                }
                changed = progress_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = stop.cancelled() => {
                    break;
                }
            }
        }
        emitted
    })
}
