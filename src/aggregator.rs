//! Outcome aggregation
//!
//! The [`OutcomeAggregator`] is owned by the orchestrator's collection loop
//! and is its only writer. Results may arrive in any order; the summary is a
//! merge over a map keyed by item id, so it does not depend on that order.

use crate::error::{Error, Result};
use crate::types::{ErrorCategory, TaskResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Collects terminal task results, at most one per item
#[derive(Debug, Default)]
pub struct OutcomeAggregator {
    results: BTreeMap<String, TaskResult>,
}

impl OutcomeAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal result
    ///
    /// A second result for the same item is rejected with
    /// [`Error::DuplicateResult`] and the first one is kept.
    pub fn record(&mut self, result: TaskResult) -> Result<()> {
        if self.results.contains_key(&result.item_id) {
            tracing::error!(
                item_id = %result.item_id,
                "Rejected duplicate task result"
            );
            return Err(Error::DuplicateResult(result.item_id));
        }

        tracing::info!(
            item_id = %result.item_id,
            status = if result.status.is_success() { "success" } else { "failure" },
            category = result.status.category().map(|c| c.as_str()).unwrap_or("none"),
            attempt = result.attempts.last().map(|a| a.attempt_number).unwrap_or(0),
            artifact = ?result.artifact_path,
            last_error = result.last_error.as_deref(),
            "Task result"
        );

        self.results.insert(result.item_id.clone(), result);
        Ok(())
    }

    /// Number of results recorded so far
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Build the run summary from everything recorded
    pub fn summarize(&self) -> RunSummary {
        build_summary(self.results.clone())
    }

    /// Consume the aggregator into its summary
    pub fn into_summary(self) -> RunSummary {
        build_summary(self.results)
    }
}

fn build_summary(results: BTreeMap<String, TaskResult>) -> RunSummary {
    let total = results.len();
    let succeeded = results.values().filter(|r| r.status.is_success()).count();

    RunSummary {
        total,
        succeeded,
        failed: total - succeeded,
        results,
    }
}

/// Aggregate, order-independent result of one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of distinct items
    pub total: usize,
    /// Items whose artifact was written
    pub succeeded: usize,
    /// Items that failed
    pub failed: usize,
    /// Per-item results keyed by item id
    pub results: BTreeMap<String, TaskResult>,
}

/// A failed item with its last category and error
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedItem<'a> {
    /// Item identifier
    pub item_id: &'a str,
    /// Terminal category
    pub category: ErrorCategory,
    /// Last per-attempt category, when it differs from the terminal one
    pub last_attempt_category: Option<ErrorCategory>,
    /// Last error message
    pub last_error: Option<&'a str>,
}

impl RunSummary {
    /// `succeeded / total`, or `None` when there is no data
    pub fn success_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.succeeded as f64 / self.total as f64)
        }
    }

    /// Whether every item succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Every failed item in id order
    pub fn failures(&self) -> impl Iterator<Item = FailedItem<'_>> {
        self.results.values().filter_map(|r| {
            let category = r.status.category()?;
            let last_attempt_category = r
                .attempts
                .iter()
                .rev()
                .find_map(|a| a.category)
                .filter(|c| *c != category);
            Some(FailedItem {
                item_id: &r.item_id,
                category,
                last_attempt_category,
                last_error: r.last_error.as_deref(),
            })
        })
    }

    /// Failure counts per terminal category
    pub fn category_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for failure in self.failures() {
            *counts.entry(failure.category.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Emit the summary as structured log lines
    pub fn log(&self) {
        for failure in self.failures() {
            tracing::warn!(
                item_id = failure.item_id,
                category = failure.category.as_str(),
                last_attempt_category = failure.last_attempt_category.map(|c| c.as_str()),
                last_error = failure.last_error,
                "Item failed"
            );
        }

        match self.success_rate() {
            Some(rate) => tracing::info!(
                total = self.total,
                succeeded = self.succeeded,
                failed = self.failed,
                success_rate_pct = rate * 100.0,
                "Run summary"
            ),
            None => tracing::info!(
                total = 0,
                succeeded = 0,
                failed = 0,
                success_rate_pct = "no data",
                "Run summary"
            ),
        }
    }

    /// Write the summary as pretty JSON
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write summary '{}': {}", path.display(), e),
            ))
        })
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total:     {}", self.total)?;
        writeln!(f, "Succeeded: {}", self.succeeded)?;
        writeln!(f, "Failed:    {}", self.failed)?;
        match self.success_rate() {
            Some(rate) => writeln!(f, "Success rate: {:.1}%", rate * 100.0)?,
            None => writeln!(f, "Success rate: no data")?,
        }

        if self.failed > 0 {
            writeln!(f, "Failed items:")?;
            for failure in self.failures() {
                write!(f, "  {} [{}]", failure.item_id, failure.category)?;
                if let Some(last) = failure.last_attempt_category {
                    write!(f, " after {last}")?;
                }
                if let Some(error) = failure.last_error {
                    write!(f, ": {error}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
