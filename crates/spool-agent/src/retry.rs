//! Retry policy for turn-fatal errors

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Exponential backoff between retries of backend failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryBackoff {
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryBackoff {
    /// Retry immediately, without waiting
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Calculate delay for a given attempt (0-indexed).
    ///
    /// Negative or NaN results from a bad multiplier wait not at all.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        if delay_secs.is_nan() || delay_secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }
}

/// What to do with a failed frame
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Not retryable: propagate immediately
    Propagate,
    /// Push the frame again with `next_attempt` after waiting `delay`
    Retry { next_attempt: u32, delay: Duration },
    /// Retryable, but the budget is spent
    Exhausted,
}

/// Bounded retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retry_attempts: u32,
    pub backoff: RetryBackoff,
}

impl RetryPolicy {
    pub fn new(max_retry_attempts: u32, backoff: RetryBackoff) -> Self {
        Self {
            max_retry_attempts,
            backoff,
        }
    }

    /// Decide the fate of a frame that failed on its `attempt`-th retry (0 = first try)
    pub fn decide(&self, error: &TaskError, attempt: u32) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Propagate;
        }
        if attempt >= self.max_retry_attempts {
            return RetryDecision::Exhausted;
        }

        let delay = if error.kind().backs_off() {
            self.backoff.delay_for_attempt(attempt)
        } else {
            Duration::ZERO
        };
        RetryDecision::Retry {
            next_attempt: attempt + 1,
            delay,
        }
    }
}
