//! Retry classification and exponential backoff.

use std::time::Duration;

use crate::TranscribeError;

/// Backoff schedule for recoverable transport errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(400),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.base_delay
    }

    /// Whether another attempt could change the outcome.
    pub fn should_retry(&self, error: &TranscribeError) -> bool {
        error.is_recoverable()
    }

    /// Delay for the retry after one that waited `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current * 2
    }
}
