//! Exponential backoff for transport reconnection.
//!
//! When the connection drops unexpectedly, the transport retries with an
//! increasing delay instead of hammering a recovering broker:
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max_delay)
//! ```
//!
//! With the default config (initial 1s, multiplier 2.0, cap 60s) that is
//! 1s, 2s, 4s, ... 60s. The attempt limit is optional; `None` retries
//! forever, which is the default for long-lived sessions.

use std::time::Duration;

use thiserror::Error;

/// Returned when the configured attempt limit has been exhausted.
#[derive(Debug, Error)]
pub enum BackoffError {
    /// Maximum retry attempts exceeded; the field carries the limit.
    #[error("Maximum number of reconnect attempts exceeded: {0}")]
    MaxAttemptLimitError(u32),
}

/// Retry delay controller for the transport's reconnect loop.
///
/// Call [`Backoff::next_sleep`] before each attempt and [`Backoff::reset`]
/// after a successful connection so the next outage starts from the
/// initial delay again.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
    /// None means retry forever.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Creates a controller. `max_attempts` of `None` retries without limit.
    pub fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier,
            attempt: 0,
            max_attempts,
        }
    }

    /// Returns the delay to sleep before the next attempt and advances the
    /// schedule. Fails once the attempt limit (if any) is exceeded.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt += 1;
        if let Some(max) = self.max_attempts {
            if self.attempt > max {
                return Err(BackoffError::MaxAttemptLimitError(max));
            }
        }

        let sleep = self.current_delay;

        let grown = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(grown).min(self.max_delay);

        Ok(sleep)
    }

    /// Restarts the schedule from the initial delay.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Attempts made since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    /// 1s initial, 60s cap, doubling, unlimited attempts.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, None)
    }
}
