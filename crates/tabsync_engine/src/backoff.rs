//! Bounded exponential backoff for transient remote failures.

use crate::error::SyncResult;
use std::time::Duration;
use tracing::warn;

/// Computes a bounded, deterministic retry delay schedule.
///
/// The delay before retry `i` (0-indexed) is `min(base * 2^i, max)`, which
/// makes the schedule monotonically non-decreasing and exactly reproducible
/// in tests.
#[derive(Debug, Clone)]
pub struct BackoffController {
    base: Duration,
    max: Duration,
    attempts: u32,
}

impl BackoffController {
    /// Creates a controller allowing `attempts` total attempts.
    pub fn new(base: Duration, max: Duration, attempts: u32) -> Self {
        Self {
            base,
            max,
            attempts: attempts.max(1),
        }
    }

    /// Total attempts allowed, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The delay applied after failed attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(63) as i32);
        let delay = self.base.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max.as_secs_f64()))
    }

    /// The full delay schedule, one entry per attempt.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.attempts)
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }

    /// Executes `op`, retrying retryable failures per the schedule.
    ///
    /// Returns the success value together with the number of retries that
    /// were needed. Once attempts are exhausted (or on the first
    /// non-retryable failure) the last error is re-raised and the caller's
    /// state is left for the next cycle.
    pub fn retry<T, F>(&self, description: &str, mut op: F) -> SyncResult<(T, u32)>
    where
        F: FnMut() -> SyncResult<T>,
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if error.is_retryable() && attempt + 1 < self.attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        %description,
                        attempt = attempt + 1,
                        max_attempts = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(16), 5)
    }
}
