//! Failure handling for range queries
//!
//! A failed range is re-dispatched as its own unit, possibly to a different
//! worker, until its retries run out. What happens next depends on the
//! [`FailureMode`]: abort the whole scan (the default, matching a plain
//! fail-fast scan) or finish and report the ranges that were never scanned.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy with exponential backoff
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Re-dispatches allowed per range
    /// Default: 0 (fail fast)
    pub max_retries: u32,

    /// Delay before the first re-dispatch
    /// Default: 100ms
    pub initial_delay: Duration,

    /// Maximum delay between re-dispatches
    /// Default: 5 seconds
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    /// Default: 2.0
    pub multiplier: f64,

    /// Add random jitter to delays
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `max_retries` re-dispatches with default backoff
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Calculate delay for a given retry number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);

        let delay_ms = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25;
            delay_ms * (1.0 + jitter)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Check if a range that already failed `retries_used` retries may go again
    pub fn should_retry(&self, retries_used: u32) -> bool {
        retries_used < self.max_retries
    }
}

/// What to do with a range whose retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop the scan and return the range failure
    #[default]
    Abort,
    /// Keep scanning; list the range in the result as un-scanned
    ReportPartial,
}

/// Retry policy plus the final decision for exhausted ranges
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailurePolicy {
    /// Retry budget and backoff
    pub retry: RetryPolicy,
    /// Decision once the budget is spent
    pub mode: FailureMode,
}

impl FailurePolicy {
    /// Fail the scan on the first range error
    pub fn fail_fast() -> Self {
        Self::default()
    }

    /// Retry each range up to `max_retries` times, then abort
    pub fn retry_then_abort(max_retries: u32) -> Self {
        Self {
            retry: RetryPolicy::with_retries(max_retries),
            mode: FailureMode::Abort,
        }
    }

    /// Retry each range up to `max_retries` times, then report it un-scanned
    pub fn retry_then_report(max_retries: u32) -> Self {
        Self {
            retry: RetryPolicy::with_retries(max_retries),
            mode: FailureMode::ReportPartial,
        }
    }
}
