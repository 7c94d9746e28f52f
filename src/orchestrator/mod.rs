//! Run orchestration (decomposed into focused submodules)
//!
//! - [`task`] - per-item state machine
//! - [`progress`] - periodic progress reporter

mod progress;
mod task;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use progress::ProgressSnapshot;

use crate::aggregator::{OutcomeAggregator, RunSummary};
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::retry::RetryPolicy;
use crate::store::{ArtifactStore, FsArtifactStore};
use crate::types::{ErrorCategory, Event, TaskResult, TaskStatus};
use progress::spawn_progress_reporter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use task::{FetchTask, TaskContext};
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Buffer of the event channel; slow subscribers see `RecvError::Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Fetches a set of items concurrently and aggregates their outcomes
///
/// One task is spawned per distinct item. Tasks never share mutable state:
/// each reports exactly one [`TaskResult`] through its join handle, and the
/// collection loop in [`Orchestrator::run`] is the only writer of the
/// aggregator and the progress channel.
///
/// # Example
///
/// ```no_run
/// use dexfetch::{Config, Orchestrator, cancel_on_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Orchestrator::new(Config::default()).await?;
///     tokio::spawn(cancel_on_signal(orchestrator.cancellation_token()));
///
///     let summary = orchestrator.run(["bulbasaur", "ivysaur"]).await?;
///     println!("{summary}");
///     Ok(())
/// }
/// ```
pub struct Orchestrator {
    config: Arc<Config>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn ArtifactStore>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<Event>,
    progress_tx: watch::Sender<ProgressSnapshot>,
}

impl Orchestrator {
    /// Create an orchestrator with the HTTP fetcher and filesystem store
    ///
    /// Runs the pre-flight checks: the configuration is validated, the HTTP
    /// client is built and the output directory is created and probed for
    /// writability. Any failure here is fatal for the run.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let fetcher = HttpFetcher::new(&config.api)?;
        let store = FsArtifactStore::open(config.output.output_dir.clone())
            .await?
            .with_stale_partial_age(config.output.stale_partial_age);

        tracing::info!(
            base_url = %config.api.base_url,
            output_dir = %store.dir().display(),
            max_attempts = config.retry.max_attempts,
            max_concurrency = ?config.max_concurrency,
            "Orchestrator ready"
        );

        Self::with_components(config, Arc::new(fetcher), Arc::new(store))
    }

    /// Create an orchestrator from explicit collaborators
    pub fn with_components(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (progress_tx, _rx) = watch::channel(ProgressSnapshot::default());

        Ok(Self {
            policy: RetryPolicy::from_config(&config.retry),
            config: Arc::new(config),
            fetcher,
            store,
            cancel: CancellationToken::new(),
            event_tx,
            progress_tx,
        })
    }

    /// Replace the retry policy derived from the configuration
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Subscribe to run events
    ///
    /// Multiple subscribers are supported. A subscriber that falls more than
    /// 1000 events behind receives `RecvError::Lagged`; the run is unaffected.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Watch the progress of the current run
    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    /// Token that cancels the run when triggered
    ///
    /// Tasks observe it at suspension points only (permit wait, backoff), so
    /// requests already in flight complete first. A cancelled token stays
    /// cancelled: later runs on the same orchestrator fail every item as
    /// `cancelled` without touching the network.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation of the current run
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.cancel.cancel();
    }

    /// The active configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Fetch every item and wait for all of them to reach a terminal state
    ///
    /// Duplicate ids are collapsed (first occurrence wins). The returned
    /// summary holds exactly one result per distinct id. Dropping the
    /// returned future aborts every task it spawned.
    pub async fn run<I, S>(&self, items: I) -> Result<RunSummary>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let started = Instant::now();
        let items = dedup_items(items);
        let total = items.len();

        tracing::info!(total, fetcher = self.fetcher.name(), "Starting run");

        self.progress_tx.send_replace(ProgressSnapshot {
            total,
            ..Default::default()
        });
        let reporter_stop = CancellationToken::new();
        let reporter = spawn_progress_reporter(
            self.progress_tx.subscribe(),
            self.config.progress_interval,
            reporter_stop.clone(),
        );

        let ctx = Arc::new(TaskContext {
            config: Arc::clone(&self.config),
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            policy: self.policy.clone(),
            cancel: self.cancel.clone(),
            limiter: self.config.max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            event_tx: self.event_tx.clone(),
        });

        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::with_capacity(total);
        for item_id in items {
            self.event_tx
                .send(Event::TaskStarted {
                    item_id: item_id.clone(),
                })
                .ok();
            let task = FetchTask::new(item_id.clone(), Arc::clone(&ctx));
            let handle = tasks.spawn(task.run());
            spawned.insert(handle.id(), item_id);
        }

        let mut aggregator = OutcomeAggregator::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let result = match joined {
                Ok((_, result)) => result,
                Err(e) => {
                    let item_id = spawned.get(&e.id()).cloned().unwrap_or_default();
                    tracing::error!(item_id = %item_id, error = %e, "Task did not complete");
                    let result = internal_failure(item_id, &e);
                    self.event_tx
                        .send(Event::TaskFinished {
                            item_id: result.item_id.clone(),
                            status: result.status,
                        })
                        .ok();
                    result
                }
            };

            let succeeded = result.status.is_success();
            if let Err(e) = aggregator.record(result) {
                tracing::error!(error = %e, "Failed to record task result");
                continue;
            }
            let finished = aggregator.len();
            self.progress_tx.send_modify(|p| {
                p.finished = finished;
                if succeeded {
                    p.succeeded += 1;
                } else {
                    p.failed += 1;
                }
            });
        }

        match self.store.cleanup_partials().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Removed partial artifacts"),
            Err(e) => tracing::warn!(error = %e, "Failed to clean up partial artifacts"),
        }

        reporter_stop.cancel();
        if let Err(e) = reporter.await {
            tracing::warn!(error = %e, "Progress reporter did not stop cleanly");
        }

        let summary = aggregator.into_summary();
        summary.log();
        tracing::info!(
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            cancelled = self.cancel.is_cancelled(),
            "Run finished"
        );
        self.event_tx
            .send(Event::RunFinished {
                total: summary.total,
                succeeded: summary.succeeded,
                failed: summary.failed,
            })
            .ok();

        Ok(summary)
    }
}

/// Drop repeated ids, keeping the first occurrence and the input order
fn dedup_items<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for item in items {
        let item = item.into();
        if seen.insert(item.clone()) {
            unique.push(item);
        } else {
            tracing::warn!(item_id = %item, "Duplicate item id ignored");
        }
    }
    unique
}

fn internal_failure(item_id: String, error: &tokio::task::JoinError) -> TaskResult {
    let reason = if error.is_panic() {
        "task panicked"
    } else {
        "task was aborted"
    };
    TaskResult {
        item_id,
        status: TaskStatus::Failure(ErrorCategory::Internal),
        attempts: Vec::new(),
        artifact_path: None,
        last_error: Some(reason.to_string()),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::test_helpers::{MemoryStore, ScriptedFetcher, record_body, test_config};
    use super::*;
    use crate::types::FetchOutcome;
    use async_trait::async_trait;
    use std::time::Duration;

    fn orchestrator(
        fetcher: Arc<ScriptedFetcher>,
        store: Arc<MemoryStore>,
        config: Config,
    ) -> Orchestrator {
        Orchestrator::with_components(config, fetcher, store).unwrap()
    }

    #[tokio::test]
    async fn mixed_run_counts_every_item_once() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.script("bulbasaur", vec![FetchOutcome::Success { body: record_body("bulbasaur") }]);
        fetcher.script("ivysaur", vec![FetchOutcome::Success { body: record_body("ivysaur") }]);
        let store = Arc::new(MemoryStore::new());
        let orch = orchestrator(fetcher.clone(), store.clone(), test_config());

        let summary = orch
            .run(["bulbasaur", "ivysaur", "does-not-exist-404"])
            .await
            .unwrap();

        assert_eq!((summary.total, summary.succeeded, summary.failed), (3, 2, 1));
        assert_eq!(
            summary.results["does-not-exist-404"].status,
            TaskStatus::Failure(ErrorCategory::NotFound)
        );
        assert_eq!(fetcher.calls("does-not-exist-404"), 1);
        assert_eq!(store.writes(), 2);

        let progress = *orch.progress().borrow();
        assert_eq!(progress.finished, 3);
        assert!(progress.is_complete());
    }

    #[tokio::test]
    async fn duplicate_items_are_collapsed() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.script("ditto", vec![FetchOutcome::Success { body: record_body("ditto") }]);
        let orch = orchestrator(fetcher.clone(), Arc::new(MemoryStore::new()), test_config());

        let summary = orch.run(["ditto", "ditto", "ditto"]).await.unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(fetcher.calls("ditto"), 1);
    }

    #[tokio::test]
    async fn empty_run_has_no_data() {
        let orch = orchestrator(
            Arc::new(ScriptedFetcher::new()),
            Arc::new(MemoryStore::new()),
            test_config(),
        );

        let summary = orch.run(Vec::<String>::new()).await.unwrap();

        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate(), None);
    }

    #[tokio::test]
    async fn max_concurrency_bounds_in_flight_fetches() {
        let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(30)));
        let ids: Vec<String> = (1..=8).map(|n| format!("item-{n}")).collect();
        for id in &ids {
            fetcher.script(id, vec![FetchOutcome::Success { body: record_body(id) }]);
        }
        let mut config = test_config();
        config.max_concurrency = Some(2);
        let orch = orchestrator(fetcher.clone(), Arc::new(MemoryStore::new()), config);

        let summary = orch.run(ids.clone()).await.unwrap();

        assert_eq!(summary.succeeded, 8);
        assert!(fetcher.peak_in_flight() <= 2, "peak was {}", fetcher.peak_in_flight());
    }

    #[tokio::test]
    async fn cancellation_mid_backoff_fails_live_tasks() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.script("ditto", vec![FetchOutcome::Success { body: record_body("ditto") }]);
        fetcher.script("snorlax", vec![FetchOutcome::HttpError { code: 503 }]);
        fetcher.script("slowbro", vec![FetchOutcome::HttpError { code: 429 }]);
        let mut config = test_config();
        config.retry.base_delay = Duration::from_secs(30);
        let orch = orchestrator(fetcher.clone(), Arc::new(MemoryStore::new()), config);

        let mut events = orch.subscribe();
        let token = orch.cancellation_token();
        tokio::spawn(async move {
            let mut backing_off = 0;
            while let Ok(event) = events.recv().await {
                if matches!(event, Event::BackingOff { .. }) {
                    backing_off += 1;
                    if backing_off == 2 {
                        token.cancel();
                        break;
                    }
                }
            }
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            orch.run(["ditto", "snorlax", "slowbro"]),
        )
        .await
        .expect("cancelled run must finish well before its backoff")
        .unwrap();

        assert_eq!(summary.total, 3);
        assert!(summary.results["ditto"].status.is_success());
        for id in ["snorlax", "slowbro"] {
            let result = &summary.results[id];
            assert_eq!(result.status, TaskStatus::Failure(ErrorCategory::Cancelled));
            assert_eq!(result.network_attempts(), 1);
        }
        assert_eq!(fetcher.total_calls(), 3);
    }

    struct PanickingFetcher;

    #[async_trait]
    impl Fetcher for PanickingFetcher {
        async fn fetch(&self, url: &str) -> FetchOutcome {
            if url.ends_with("/missingno") {
                panic!("glitch");
            }
            FetchOutcome::Success {
                body: record_body(url.rsplit('/').next().unwrap()),
            }
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    #[tokio::test]
    async fn panicked_task_is_reported_as_internal() {
        let orch = Orchestrator::with_components(
            test_config(),
            Arc::new(PanickingFetcher),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();

        let summary = orch.run(["missingno", "mew"]).await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(
            summary.results["missingno"].status,
            TaskStatus::Failure(ErrorCategory::Internal)
        );
        assert!(summary.results["mew"].status.is_success());
    }

    #[tokio::test]
    async fn events_cover_every_task_and_end_with_run_finished() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.script("mew", vec![FetchOutcome::Success { body: record_body("mew") }]);
        let orch = orchestrator(fetcher, Arc::new(MemoryStore::new()), test_config());
        let mut events = orch.subscribe();

        orch.run(["mew", "missingno"]).await.unwrap();

        let mut started = 0;
        let mut finished = 0;
        let mut last = None;
        while let Ok(event) = events.try_recv() {
            match &event {
                Event::TaskStarted { .. } => started += 1,
                Event::TaskFinished { .. } => finished += 1,
                _ => {}
            }
            last = Some(event);
        }
        assert_eq!(started, 2);
        assert_eq!(finished, 2);
        assert!(matches!(
            last,
            Some(Event::RunFinished {
                total: 2,
                succeeded: 1,
                failed: 1
            })
        ));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_up_front() {
        let mut config = test_config();
        config.retry.max_attempts = 0;

        let result = Orchestrator::with_components(
            config,
            Arc::new(ScriptedFetcher::new()),
            Arc::new(MemoryStore::new()),
        );

        assert!(result.is_err_and(|e| e.is_fatal()));
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        assert_eq!(
            dedup_items(["b", "a", "b", "c", "a"]),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }
}
