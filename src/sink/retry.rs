//! Exponential backoff for backend statement timeouts.
//!
//! Only [`FailureKind::StatementTimeout`] is retryable. Every other kind is a
//! batch-level decision taken by the database sink.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use codex_core::sink::{FailureKind, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(FailureKind::StatementTimeout, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(2));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::FailureKind;

/// Default maximum upsert attempts, the first one included.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the second attempt (2 seconds).
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Backoff multiplier (doubles each attempt).
const BACKOFF_MULTIPLIER: u32 = 2;

/// What the database sink does after a failed upsert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay`, then resend the same batch as attempt number `attempt`.
    Retry { delay: Duration, attempt: u32 },

    /// Give up on the batch.
    DoNotRetry { reason: String },
}

/// Retry configuration for backend timeouts.
///
/// Delays are `initial_backoff * 2^(attempt - 1)` with no jitter, so with
/// defaults the sink sleeps 2s, 4s, 8s, 16s and gives up after the fifth
/// attempt without sleeping again.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Upserts sent per batch, the first one included.
    max_attempts: u32,
    /// Sleep after the first timed-out upsert.
    initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings. `max_attempts` is at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// Default 2s backoff with a different attempt budget.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(max_attempts, DEFAULT_INITIAL_BACKOFF)
    }

    /// Upserts sent per batch at most.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after `attempt` (1-indexed) failed with `kind`.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> RetryDecision {
        if kind != FailureKind::StatementTimeout {
            return RetryDecision::DoNotRetry {
                reason: format!("{kind} is not retryable"),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, "statement timeout budget used up");
            return RetryDecision::DoNotRetry {
                reason: format!("all {} attempts timed out", self.max_attempts),
            };
        }

        let delay = self.backoff_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis(), "scheduling another upsert attempt");

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Delay after the given failed attempt.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}
