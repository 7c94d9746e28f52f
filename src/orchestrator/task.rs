//! Per-item fetch task.
//!
//! A [`FetchTask`] drives one item through
//! `Pending -> Attempting -> {Succeeded, Failed}`. It owns its attempt log
//! until it returns the [`TaskResult`], which is the only thing it hands back
//! to the orchestrator.

use crate::config::Config;
use crate::fetch::Fetcher;
use crate::retry::{Decision, RetryPolicy};
use crate::store::ArtifactStore;
use crate::types::{
    AttemptRecord, ErrorCategory, Event, FetchOutcome, ItemId, TaskResult, TaskState, TaskStatus,
    duration_ms,
};
use crate::validation::{Validation, validate_payload};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Collaborators shared by every task of a run (read-only)
pub(crate) struct TaskContext {
    pub(crate) config: Arc<Config>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) store: Arc<dyn ArtifactStore>,
    pub(crate) policy: RetryPolicy,
    pub(crate) cancel: CancellationToken,
    /// Present when `max_concurrency` is set
    pub(crate) limiter: Option<Arc<Semaphore>>,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

/// Cancellation was observed at a suspension point
struct Cancelled;

/// State machine for one item
pub(crate) struct FetchTask {
    item_id: String,
    ctx: Arc<TaskContext>,
    state: TaskState,
    attempts: Vec<AttemptRecord>,
    last_error: Option<String>,
}

impl FetchTask {
    pub(crate) fn new(item_id: String, ctx: Arc<TaskContext>) -> Self {
        Self {
            item_id,
            ctx,
            state: TaskState::Pending,
            attempts: Vec::new(),
            last_error: None,
        }
    }

    /// Drive the task to a terminal state
    pub(crate) async fn run(mut self) -> TaskResult {
        let id = match ItemId::parse(self.item_id.as_str()) {
            Ok(id) => id,
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.append(0, Some(ErrorCategory::InvalidInput), Utc::now());
                return self.fail(ErrorCategory::InvalidInput);
            }
        };

        let ctx = Arc::clone(&self.ctx);

        if ctx.config.output.skip_existing && ctx.store.exists(id.as_str()).await {
            tracing::info!(item_id = %id, "Artifact already present, skipping fetch");
            return self.succeed(ctx.store.artifact_path(id.as_str()));
        }

        let url = ctx.config.api.item_url(id.as_str());
        let mut attempt: u32 = 1;

        loop {
            let permit = match self.wait_for_turn().await {
                Ok(permit) => permit,
                Err(Cancelled) => return self.cancelled(attempt),
            };

            self.state = TaskState::Attempting;
            let started = Utc::now();
            let outcome = ctx.fetcher.fetch(&url).await;
            drop(permit);

            let validation = match &outcome {
                FetchOutcome::Success { body } => {
                    validate_payload(&ctx.config.validation, id.as_str(), body)
                }
                _ => Validation::NotApplicable,
            };

            match (ctx.policy.decide(&outcome, &validation, attempt), &outcome) {
                (Decision::Accept, FetchOutcome::Success { body }) => {
                    return match ctx.store.write(id.as_str(), body).await {
                        Ok(path) => {
                            self.append(attempt, None, started);
                            self.succeed(path)
                        }
                        Err(e) => {
                            self.last_error = Some(e.to_string());
                            self.append(attempt, Some(ErrorCategory::StorageError), started);
                            self.fail(ErrorCategory::StorageError)
                        }
                    };
                }
                (Decision::Accept, _) => {
                    // The policy only accepts successful outcomes
                    self.last_error = Some(format!(
                        "accepted non-success outcome: {}",
                        outcome.describe()
                    ));
                    self.append(attempt, Some(ErrorCategory::Internal), started);
                    return self.fail(ErrorCategory::Internal);
                }
                (Decision::RetryAfter { delay, category }, _) => {
                    self.last_error = Some(describe_failure(&outcome, &validation));
                    self.append(attempt, Some(category), started);

                    tracing::debug!(
                        item_id = %id,
                        attempt,
                        delay_ms = duration_ms(delay),
                        "Backing off before retry"
                    );
                    ctx.event_tx
                        .send(Event::BackingOff {
                            item_id: self.item_id.clone(),
                            next_attempt: attempt + 1,
                            delay_ms: duration_ms(delay),
                        })
                        .ok();

                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => return self.cancelled(attempt + 1),
                        _ = tokio::time::sleep(delay) => {}
                    }

                    attempt += 1;
                    self.state = TaskState::Pending;
                }
                (Decision::GiveUp(category), _) => {
                    let attempt_category =
                        RetryPolicy::classify(&outcome, &validation).unwrap_or(category);
                    self.last_error = Some(describe_failure(&outcome, &validation));
                    self.append(attempt, Some(attempt_category), started);
                    return self.fail(category);
                }
            }
        }
    }

    /// Suspension point before an attempt: concurrency permit and cancellation
    async fn wait_for_turn(&self) -> Result<Option<OwnedSemaphorePermit>, Cancelled> {
        if self.ctx.cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let Some(limiter) = &self.ctx.limiter else {
            return Ok(None);
        };

        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(Cancelled),
            permit = Arc::clone(limiter).acquire_owned() => {
                // The semaphore is never closed while tasks are running
                permit.map(Some).map_err(|_| Cancelled)
            }
        }
    }

    fn append(
        &mut self,
        attempt_number: u32,
        category: Option<ErrorCategory>,
        timestamp: DateTime<Utc>,
    ) {
        let record = AttemptRecord {
            item_id: self.item_id.clone(),
            attempt_number,
            category,
            timestamp,
        };

        match category {
            None => tracing::info!(
                item_id = %self.item_id,
                attempt = attempt_number,
                category = "none",
                "Attempt succeeded"
            ),
            Some(category) => tracing::warn!(
                item_id = %self.item_id,
                attempt = attempt_number,
                category = category.as_str(),
                error = self.last_error.as_deref(),
                "Attempt failed"
            ),
        }

        self.ctx
            .event_tx
            .send(Event::AttemptFinished {
                record: record.clone(),
            })
            .ok();
        self.attempts.push(record);
    }

    fn cancelled(mut self, next_attempt: u32) -> TaskResult {
        tracing::info!(item_id = %self.item_id, attempt = next_attempt, "Task cancelled");
        if self.last_error.is_none() {
            self.last_error = Some("run cancelled".to_string());
        }
        self.append(next_attempt, Some(ErrorCategory::Cancelled), Utc::now());
        self.fail(ErrorCategory::Cancelled)
    }

    fn succeed(mut self, path: PathBuf) -> TaskResult {
        self.state = TaskState::Succeeded;
        self.finish(TaskStatus::Success, Some(path))
    }

    fn fail(mut self, category: ErrorCategory) -> TaskResult {
        self.state = TaskState::Failed;
        self.finish(TaskStatus::Failure(category), None)
    }

    fn finish(self, status: TaskStatus, artifact_path: Option<PathBuf>) -> TaskResult {
        debug_assert!(self.state.is_terminal());

        self.ctx
            .event_tx
            .send(Event::TaskFinished {
                item_id: self.item_id.clone(),
                status,
            })
            .ok();

        TaskResult {
            item_id: self.item_id,
            status,
            attempts: self.attempts,
            artifact_path,
            last_error: self.last_error,
        }
    }
}

fn describe_failure(outcome: &FetchOutcome, validation: &Validation) -> String {
    match validation {
        Validation::Invalid { reason } => format!("invalid payload: {reason}"),
        _ => outcome.describe(),
    }
}
