//! Per-queue job options and the retry decision derived from them.

use crate::error::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every failure
    Fixed { delay_ms: u64 },
    /// `base * 2^(n-1)` after the n-th failure
    Exponential { base_ms: u64 },
}

impl Backoff {
    /// Delay to wait after `attempts_made` failed attempts (1-based).
    pub fn delay(&self, attempts_made: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms } => {
                let exponent = attempts_made.saturating_sub(1).min(32);
                Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential { base_ms: 1000 }
    }
}

/// Options applied to every job added to a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Total attempts, including the first
    pub attempts: u32,
    pub backoff: Backoff,
    /// Completed records retained per queue
    pub keep_completed: u64,
    /// Failed records retained per queue
    pub keep_failed: u64,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
            keep_completed: 500,
            keep_failed: 1000,
        }
    }
}

impl JobOptions {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retention(mut self, keep_completed: u64, keep_failed: u64) -> Self {
        self.keep_completed = keep_completed;
        self.keep_failed = keep_failed;
        self
    }
}

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-deliver after `delay`
    Retry { delay: Duration },
    /// Attempt budget spent (or the error is permanent); record as failed
    Exhausted,
}

/// Decide the fate of a job that has now failed `attempts_made` times.
pub fn decide(
    attempts_made: u32,
    max_attempts: u32,
    backoff: &Backoff,
    category: ErrorCategory,
) -> RetryDecision {
    if category == ErrorCategory::Permanent || attempts_made >= max_attempts {
        RetryDecision::Exhausted
    } else {
        RetryDecision::Retry {
            delay: backoff.delay(attempts_made),
        }
    }
}
