//! Retry policy for transport calls.
//!
//! Linear backoff: the wait after attempt `n` (1-based) is `base_delay × n`,
//! capped at `max_delay`. Which errors are retried is decided by
//! [`ErrorCode::is_retryable`](super::error::ErrorCode::is_retryable), not here.

use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per call, including the first (minimum 1).
    pub max_attempts: u32,
    /// Backoff unit. Attempt `n` waits `base_delay × n` before the next.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a config with the given attempt count and default backoff.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Same attempt count, no waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }

    /// Attempt count with the minimum applied.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
