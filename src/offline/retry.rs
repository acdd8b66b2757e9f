//! # Retry Logic and Backoff Strategies
//!
//! Bounded retry of failed sync cycles. The delay before retry `n` is a pure
//! function of `n`, so the policy can be tested without timers.
//!
//! With the default schedule (base 5 s, cap 30 s, 3 retries):
//!
//! | failed attempts | outcome            |
//! |-----------------|--------------------|
//! | 1               | retry after 5 s    |
//! | 2               | retry after 10 s   |
//! | 3               | give up            |
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use watchsync::offline::retry::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.decide(1), RetryDecision::RetryAfter(Duration::from_secs(5)));
//! assert_eq!(policy.decide(3), RetryDecision::Exhausted);
//! ```

use crate::shared::config::SyncConfig;
use std::time::Duration;

/// `min(base * 2^(attempt-1), cap)`, saturating instead of overflowing
pub fn exponential_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after the delay
    RetryAfter(Duration),
    /// Retries are used up; surface the failure
    Exhausted,
}

/// Retry ceiling plus exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts allowed before giving up
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for any delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl RetryPolicy {
    /// Exponential policy from the engine configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_retry_delay,
            max_delay: config.max_retry_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        exponential_delay(attempt, self.base_delay, self.max_delay)
    }

    /// Decide after `retry_count` consecutive failures (already incremented)
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_retries {
            RetryDecision::RetryAfter(self.delay(retry_count))
        } else {
            RetryDecision::Exhausted
        }
    }
}
