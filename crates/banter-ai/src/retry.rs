//! Bounded exponential backoff for retryable upstream failures.

use std::time::Duration;

use crate::error::LlmError;

/// Backoff policy: only rate-limited failures are retried, with a fixed base
/// delay doubling per attempt, up to a total attempt ceiling.
///
/// The policy is stateless; the caller threads the attempt counter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(300),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-indexed):
    /// `base * 2^(attempt-1)`, bounded by `max_delay`. A server-provided
    /// retry-after hint overrides the computed delay, same bound.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(seconds) = retry_after_secs {
            return Duration::from_secs(seconds).min(self.max_delay);
        }

        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Decide whether the exchange should be reattempted after `error` on
    /// failed attempt `attempt` (1-indexed). `None` means propagate: either
    /// the error kind is non-retryable or the attempt ceiling is reached.
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> Option<Duration> {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return None;
        }
        Some(self.delay_for(attempt, error.retry_after()))
    }
}
