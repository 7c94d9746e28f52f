//! # dexfetch
//!
//! Concurrent fetch orchestrator for named records served over HTTP.
//!
//! Each item is fetched from `{base_url}/{item_id}`, validated, and written
//! atomically to `{output_dir}/{item_id}.json`. Failures are classified into
//! an [`ErrorCategory`] and retried according to a [`RetryPolicy`]; every item
//! ends with exactly one [`TaskResult`], and the run ends with a
//! [`RunSummary`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use dexfetch::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.max_concurrency = Some(4);
//!
//!     let orchestrator = Orchestrator::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = orchestrator.run(["bulbasaur", "ivysaur", "ditto"]).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Outcome aggregation and run summaries
pub mod aggregator;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Single-attempt HTTP fetch
pub mod fetch;
/// Item sources
pub mod items;
/// Run orchestration
pub mod orchestrator;
/// Retry policy and backoff
pub mod retry;
/// Atomic artifact storage
pub mod store;
/// Core types and events
pub mod types;
/// Payload validation
pub mod validation;

// Re-export commonly used types
pub use aggregator::{FailedItem, OutcomeAggregator, RunSummary};
pub use config::{ApiConfig, BackoffKind, Config, OutputConfig, RetryConfig, ValidationConfig};
pub use error::{Error, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use orchestrator::{Orchestrator, ProgressSnapshot};
pub use retry::{Backoff, Decision, ExponentialBackoff, FixedBackoff, RetryPolicy};
pub use store::{ArtifactStore, FsArtifactStore};
pub use types::{
    AttemptRecord, ErrorCategory, Event, FetchOutcome, ItemId, TaskResult, TaskState, TaskStatus,
};
pub use validation::{Validation, validate_payload};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when a termination signal arrives.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns early, without cancelling, if the token is cancelled by someone
/// else first.
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
///     orchestrator.run(["pikachu"]).await?;
///     Ok(())
/// }
/// ```
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = wait_for_signal() => {
            tracing::warn!("Cancelling run; in-flight requests will finish first");
            token.cancel();
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            // Without a signal source the run can only be cancelled by the caller
            std::future::pending::<()>().await;
        }
    }
}
