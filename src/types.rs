//! Core types for dexfetch

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{Error, Result};

#[allow(clippy::expect_used)]
static ITEM_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("item id pattern is a valid regex"));

/// Validated item identifier
///
/// Used both as the API path segment and as the artifact filename stem, so it
/// is restricted to ASCII letters, digits and `-`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Validate and wrap an item identifier
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if ITEM_ID_PATTERN.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(Error::InvalidItem(raw))
        }
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ItemId {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(raw)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Result of a single network attempt, produced once and never mutated
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 2xx response with its body
    Success {
        /// Raw response body
        body: Vec<u8>,
    },
    /// Non-2xx response
    HttpError {
        /// HTTP status code
        code: u16,
    },
    /// Connection, timeout or body-read failure
    TransportError {
        /// Human-readable description of the failure
        message: String,
    },
}

impl FetchOutcome {
    /// Short description used as the task's last error
    pub fn describe(&self) -> String {
        match self {
            FetchOutcome::Success { body } => format!("HTTP 2xx ({} bytes)", body.len()),
            FetchOutcome::HttpError { code } => format!("HTTP {code}"),
            FetchOutcome::TransportError { message } => message.clone(),
        }
    }
}

/// Classified reason an attempt or a task failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 404 - the resource does not exist
    NotFound,
    /// 429 - the server asked us to slow down
    RateLimited,
    /// 5xx
    ServerError,
    /// Connect failure, timeout, reset
    TransportError,
    /// Body is not the record we asked for
    InvalidPayload,
    /// Item id rejected before any network call
    InvalidInput,
    /// Retry budget consumed
    Exhausted,
    /// Writing the artifact failed
    StorageError,
    /// Run was interrupted
    Cancelled,
    /// Any other non-success HTTP status
    HttpError,
    /// Task panicked before producing a result
    Internal,
}

impl ErrorCategory {
    /// Stable snake_case name used in logs and summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::TransportError => "transport_error",
            ErrorCategory::InvalidPayload => "invalid_payload",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Exhausted => "exhausted",
            ErrorCategory::StorageError => "storage_error",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::HttpError => "http_error",
            ErrorCategory::Internal => "internal",
        }
    }

    /// Returns true if an attempt failing with this category may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimited
                | ErrorCategory::ServerError
                | ErrorCategory::TransportError
                | ErrorCategory::InvalidPayload
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a task's append-only attempt log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Item the attempt belongs to
    pub item_id: String,
    /// 1-based attempt number (0 for a pre-flight rejection)
    pub attempt_number: u32,
    /// Failure category of this attempt, `None` when it succeeded
    pub category: Option<ErrorCategory>,
    /// When the attempt started
    pub timestamp: DateTime<Utc>,
}

/// Terminal status of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "category", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Artifact written
    Success,
    /// Task failed with the given category
    Failure(ErrorCategory),
}

impl TaskStatus {
    /// Whether the task succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success)
    }

    /// Failure category, if any
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            TaskStatus::Success => None,
            TaskStatus::Failure(category) => Some(*category),
        }
    }
}

/// Lifecycle state of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, waiting to start (or for a concurrency permit)
    Pending,
    /// A fetch attempt is in flight or being evaluated
    Attempting,
    /// Terminal: artifact written
    Succeeded,
    /// Terminal: gave up
    Failed,
}

impl TaskState {
    /// Terminal states are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

/// Immutable value a task produces exactly once
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Item the task was created for (raw, possibly invalid)
    pub item_id: String,
    /// Terminal status
    pub status: TaskStatus,
    /// Attempt log in order
    pub attempts: Vec<AttemptRecord>,
    /// Path of the written artifact on success
    pub artifact_path: Option<PathBuf>,
    /// Description of the last failure, if any
    pub last_error: Option<String>,
}

impl TaskResult {
    /// Number of attempts that actually went to the network
    pub fn network_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| {
                a.attempt_number > 0
                    && !matches!(
                        a.category,
                        Some(ErrorCategory::Cancelled | ErrorCategory::InvalidInput)
                    )
            })
            .count()
    }

    /// The last category recorded on this task, terminal or per-attempt
    pub fn last_category(&self) -> Option<ErrorCategory> {
        self.status
            .category()
            .or_else(|| self.attempts.iter().rev().find_map(|a| a.category))
    }
}

/// Events emitted during a run
///
/// Subscribe via [`Orchestrator::subscribe`](crate::Orchestrator::subscribe).
/// Events are informational; dropping the receiver never affects the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was spawned
    TaskStarted {
        /// Item identifier
        item_id: String,
    },
    /// An attempt finished and was classified
    AttemptFinished {
        /// The appended record
        record: AttemptRecord,
    },
    /// A task is sleeping before its next attempt
    BackingOff {
        /// Item identifier
        item_id: String,
        /// Attempt that will run after the delay
        next_attempt: u32,
        /// Delay in milliseconds
        delay_ms: u64,
    },
    /// A task reached a terminal state
    TaskFinished {
        /// Item identifier
        item_id: String,
        /// Terminal status
        status: TaskStatus,
    },
    /// The run is complete and every task has reported
    RunFinished {
        /// Number of distinct items
        total: usize,
        /// Successful tasks
        succeeded: usize,
        /// Failed tasks
        failed: usize,
    },
}

/// Convert a delay to whole milliseconds for events and log fields
pub(crate) fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
