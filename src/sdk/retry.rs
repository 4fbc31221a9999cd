// SPDX-License-Identifier: MIT

//! Retry policy for step attempts

use std::time::Duration;

use crate::sdk::error::StepFailure;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Re-attempt the same invocation after `delay`
    Retry { delay: Duration },
    /// Record the failure as the step's terminal result for the round
    GiveUp,
}

/// Exponential backoff policy.
///
/// `max_attempts` counts the first attempt, so `max_attempts = 3` allows two
/// retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    /// Scale each delay by a random factor in [0.8, 1.2]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(128),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Retry immediately, up to `max_attempts` total attempts
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            jitter: false,
            ..Self::default()
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Decide whether attempt number `attempt` (1-based) gets a successor
    pub fn decide(&self, attempt: u32, failure: &StepFailure) -> RetryDecision {
        if !failure.retryable || attempt >= self.max_attempts.max(1) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.backoff(attempt),
        }
    }

    /// Delay before the attempt following `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let base = self.initial_interval.as_secs_f64() * self.backoff_factor.max(1.0).powi(exp);
        let capped = base.min(self.max_interval.as_secs_f64());
        let scaled = if self.jitter {
            capped * (0.8 + rand::random::<f64>() * 0.4)
        } else {
            capped
        };
        // Jitter can push a near-MAX cap past what Duration holds
        Duration::try_from_secs_f64(scaled.max(0.0)).unwrap_or(self.max_interval)
    }
}
