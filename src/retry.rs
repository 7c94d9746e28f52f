//! Retry policy with pluggable backoff
//!
//! After every attempt the task asks [`RetryPolicy::decide`] what to do next.
//! The policy classifies the outcome into an [`ErrorCategory`] and answers
//! with one of three [`Decision`]s. How long to wait before a retry is
//! delegated to a [`Backoff`] implementation; the default is a fixed delay.
//!
//! # Example
//!
//! ```
//! use dexfetch::retry::{Decision, FixedBackoff, RetryPolicy};
//! use dexfetch::types::{ErrorCategory, FetchOutcome};
//! use dexfetch::validation::Validation;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, FixedBackoff::new(Duration::from_secs(2)));
//! let outcome = FetchOutcome::HttpError { code: 429 };
//!
//! assert_eq!(
//!     policy.decide(&outcome, &Validation::NotApplicable, 1),
//!     Decision::RetryAfter {
//!         delay: Duration::from_secs(4),
//!         category: ErrorCategory::RateLimited,
//!     }
//! );
//! ```

use crate::config::{BackoffKind, RetryConfig};
use crate::types::{ErrorCategory, FetchOutcome};
use crate::validation::Validation;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// What a task should do after an attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Payload is valid; write the artifact
    Accept,
    /// Sleep for `delay`, then attempt again
    RetryAfter {
        /// How long to wait
        delay: Duration,
        /// Classification of the failed attempt
        category: ErrorCategory,
    },
    /// Stop with the given terminal category
    GiveUp(ErrorCategory),
}

/// Delay function between attempts
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub trait Backoff: Send + Sync {
    /// Base delay before the attempt following `attempt`
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same delay before every retry
#[derive(Clone, Copy, Debug)]
pub struct FixedBackoff {
    base: Duration,
}

impl FixedBackoff {
    /// Create a fixed backoff with the given delay
    pub fn new(base: Duration) -> Self {
        Self { base }
    }
}

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.base
    }
}

/// Exponential backoff with optional jitter
///
/// Attempt `n` waits `initial * multiplier^(n-1)`, capped at `max_delay`.
/// With jitter the delay is stretched by a random factor in `[1, 2]`.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialBackoff {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound before jitter
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: u32,
    /// Randomize delays to prevent thundering herd
    pub jitter: bool,
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let delay = self
            .multiplier
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay));

        if self.jitter { add_jitter(delay) } else { delay }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

/// Decides accept / retry / give up for each attempt
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Arc<dyn Backoff>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` attempts in total
    pub fn new(max_attempts: u32, backoff: impl Backoff + 'static) -> Self {
        Self {
            max_attempts,
            backoff: Arc::new(backoff),
        }
    }

    /// Build the policy described by a [`RetryConfig`]
    pub fn from_config(config: &RetryConfig) -> Self {
        match config.backoff {
            BackoffKind::Fixed => {
                Self::new(config.max_attempts, FixedBackoff::new(config.base_delay))
            }
            BackoffKind::Exponential => Self::new(
                config.max_attempts,
                ExponentialBackoff {
                    initial_delay: config.base_delay,
                    max_delay: config.max_delay,
                    multiplier: 2,
                    jitter: config.jitter,
                },
            ),
        }
    }

    /// Total attempts allowed per item
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classify an attempt and decide what happens next
    ///
    /// `attempt` is the 1-based number of the attempt that produced
    /// `outcome`. A retry decision on the last permitted attempt becomes
    /// `GiveUp(Exhausted)`.
    pub fn decide(
        &self,
        outcome: &FetchOutcome,
        validation: &Validation,
        attempt: u32,
    ) -> Decision {
        if attempt > self.max_attempts {
            return Decision::GiveUp(ErrorCategory::Exhausted);
        }

        let Some(category) = Self::classify(outcome, validation) else {
            return Decision::Accept;
        };

        let decision = match category {
            ErrorCategory::RateLimited => self.retry(category, attempt, 2),
            category if category.is_retryable() => self.retry(category, attempt, 1),
            category => Decision::GiveUp(category),
        };

        match decision {
            Decision::RetryAfter { .. } if attempt >= self.max_attempts => {
                Decision::GiveUp(ErrorCategory::Exhausted)
            }
            other => other,
        }
    }

    /// Classification of an attempt regardless of the remaining budget
    pub fn classify(outcome: &FetchOutcome, validation: &Validation) -> Option<ErrorCategory> {
        match outcome {
            FetchOutcome::Success { .. } if validation.is_valid() => None,
            FetchOutcome::Success { .. } => Some(ErrorCategory::InvalidPayload),
            FetchOutcome::HttpError { code: 429 } => Some(ErrorCategory::RateLimited),
            FetchOutcome::HttpError { code: 404 } => Some(ErrorCategory::NotFound),
            FetchOutcome::HttpError { code } if (500..600).contains(code) => {
                Some(ErrorCategory::ServerError)
            }
            FetchOutcome::HttpError { .. } => Some(ErrorCategory::HttpError),
            FetchOutcome::TransportError { .. } => Some(ErrorCategory::TransportError),
        }
    }

    fn retry(&self, category: ErrorCategory, attempt: u32, factor: u32) -> Decision {
        let base = self.backoff.delay(attempt);
        Decision::RetryAfter {
            delay: base.checked_mul(factor).unwrap_or(Duration::MAX),
            category,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
