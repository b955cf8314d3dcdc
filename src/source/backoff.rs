//! Reconnect backoff policy
//!
//! The wait starts at zero (first attempt is immediate), jumps to the
//! configured minimum on the first failure, doubles on each subsequent
//! failure, and is clamped to the maximum. A successful subscribe resets the
//! whole state. With a finite ceiling of N, exactly N failures are tolerated;
//! failure N+1 is terminal. A ceiling of `None` retries forever.

use crate::error::BridgeError;
use std::time::Duration;

#[derive(Debug)]
pub struct Backoff {
    min_wait: Duration,
    max_wait: Duration,
    max_attempts: Option<u64>,
    wait: Duration,
    attempts: u64,
}

impl Backoff {
    /// `retries` follows the configuration convention: negative means
    /// unlimited.
    pub fn new(min_wait: Duration, max_wait: Duration, retries: i64) -> Self {
        Self {
            min_wait,
            max_wait,
            max_attempts: u64::try_from(retries).ok(),
            wait: Duration::ZERO,
            attempts: 0,
        }
    }

    /// Wait to apply before the next attempt.
    pub fn current_wait(&self) -> Duration {
        self.wait
    }

    /// Record a failure: grow the wait and count the attempt against the
    /// ceiling. Returns the new wait, or `RetriesExhausted` once the failure
    /// count exceeds the ceiling.
    pub fn advance(&mut self) -> Result<Duration, BridgeError> {
        if self.wait.is_zero() {
            self.wait = self.min_wait;
        } else {
            self.wait = self.wait.saturating_mul(2);
        }
        if self.wait > self.max_wait {
            self.wait = self.max_wait;
        }

        self.attempts += 1;
        if let Some(max) = self.max_attempts {
            if self.attempts > max {
                return Err(BridgeError::RetriesExhausted {
                    attempts: self.attempts,
                });
            }
        }
        Ok(self.wait)
    }

    /// Forget the outage: next failure starts over from the minimum wait.
    pub fn reset(&mut self) {
        self.wait = Duration::ZERO;
        self.attempts = 0;
    }
}
