//! Retry/backoff policy for block-API calls (C7).
//!
//! Wraps individual C1 calls (both `get_block` and the paginated
//! `list_blocks`): up to `max_attempts` attempts, exponential backoff with
//! full jitter, retrying only [`FailureType::Transient`] failures. Non-
//! transient failures (permission, not-found, malformed response) are raised
//! immediately — retrying them would only mask a systemic problem.
//!
//! # Example
//!
//! ```
//! use snapdl_core::snapshot::error::BlockApiError;
//! use snapdl_core::snapshot::retry::{RetryPolicy, RetryDecision, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = BlockApiError::Transient("503".into());
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("not retrying: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::error::BlockApiError;

/// Default maximum attempts (including the first), per spec §4.7.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff, per spec §4.7.
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Delay cap, per spec §4.7.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Classification of a [`BlockApiError`] for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Retryable: network failure, server 5xx, throttling.
    Transient,
    /// Not retryable: permission, not-found, or malformed response.
    Fatal,
}

/// Decision on whether to retry a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },
    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Exponential backoff with full jitter: `delay = uniform(0, min(base *
/// multiplier^(attempt-1), max_delay))`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit parameters.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy overriding only `max_attempts`, keeping spec defaults
    /// for delay shape.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// The configured maximum attempt count.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt number `attempt` (which just failed with
    /// `failure_type`) should be retried.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Fatal {
            return RetryDecision::DoNotRetry {
                reason: "fatal failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(attempt, next_attempt = attempt + 1, delay_ms = delay.as_millis(), "will retry");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// `min(base * multiplier^(attempt-1), max_delay)`, then a full-jitter
    /// uniform draw over `[0, capped]`.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = (attempt.saturating_sub(1)) as f64;
        let uncapped_ms = base_ms * self.backoff_multiplier.powf(exponent);
        let capped_ms = uncapped_ms.min(self.max_delay.as_millis() as f64);

        let mut rng = rand::thread_rng();
        let jittered_ms = if capped_ms < 1.0 {
            0
        } else {
            rng.gen_range(0..=capped_ms as u64)
        };
        Duration::from_millis(jittered_ms)
    }
}

/// Classifies a [`BlockApiError`] for the retry policy.
#[must_use]
pub fn classify_error(error: &BlockApiError) -> FailureType {
    match error {
        BlockApiError::Transient(_) => FailureType::Transient,
        BlockApiError::Unauthorized { .. }
        | BlockApiError::NotFound { .. }
        | BlockApiError::Malformed(_) => FailureType::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_spec_numbers() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn fatal_failures_never_retry() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Fatal, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn stops_after_max_attempts() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Transient, 5);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn retries_within_budget_with_bounded_delay() {
        let policy = RetryPolicy::default();
        for attempt in 1..5 {
            match policy.should_retry(FailureType::Transient, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    assert_eq!(next, attempt + 1);
                    assert!(delay <= Duration::from_secs(5));
                }
                RetryDecision::DoNotRetry { .. } => panic!("expected retry at attempt {attempt}"),
            }
        }
    }

    #[test]
    fn classify_maps_variants_correctly() {
        assert_eq!(
            classify_error(&BlockApiError::Transient("x".into())),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&BlockApiError::NotFound {
                snapshot_id: "snap-1".into()
            }),
            FailureType::Fatal
        );
        assert_eq!(
            classify_error(&BlockApiError::Unauthorized {
                snapshot_id: "snap-1".into(),
                message: "denied".into()
            }),
            FailureType::Fatal
        );
        assert_eq!(
            classify_error(&BlockApiError::Malformed("bad".into())),
            FailureType::Fatal
        );
    }

    #[test]
    fn with_max_attempts_keeps_default_delay_shape() {
        let policy = RetryPolicy::with_max_attempts(2);
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
    }
}
