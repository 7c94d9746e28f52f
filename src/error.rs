//! Error types for dexfetch
//!
//! Only pre-flight problems surface as [`Error`]. Everything that goes wrong
//! while fetching a single item is captured as data on its
//! [`TaskResult`](crate::types::TaskResult) through an
//! [`ErrorCategory`](crate::types::ErrorCategory), so one bad item never
//! terminates the run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dexfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for dexfetch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.max_attempts")
        key: Option<String>,
    },

    /// Item identifier does not match `^[A-Za-z0-9-]+$`
    #[error("invalid item id {0:?}: only ASCII letters, digits and '-' are allowed")]
    InvalidItem(String),

    /// The artifact directory could not be created or is not writable
    #[error("artifact store unavailable at {path}: {source}")]
    StoreUnavailable {
        /// Directory the store was asked to manage
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A collaborator could not be constructed (HTTP client, TLS backend, ...)
    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    /// A second result arrived for an item that already has one
    #[error("duplicate result for item {0}")]
    DuplicateResult(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a configuration error pointing at a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error aborts a whole run rather than a single item
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config { .. } | Error::StoreUnavailable { .. } | Error::DependencyMissing(_) => {
                true
            }
            // Logic errors inside the aggregator are logged and skipped
            Error::DuplicateResult(_) => false,
            // Item-level failures are recorded on the task result
            Error::InvalidItem(_) => false,
            Error::Io(_) | Error::Serialization(_) => true,
        }
    }
}
