//! # Exponential Backoff
//!
//! Provides a capped exponential backoff for retries.
//! Used to space out relay reconnects and watch re-acquisition so an
//! unreachable backend or cluster API is not hammered in a tight loop.
//!
//! Sequence with `min = 1s`, `max = 30s`: 1s, 2s, 4s, 8s, 16s, 30s (max), 30s, ...

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each backoff is twice the previous one, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff value (for reset)
    min: Duration,
    /// Current backoff value
    current: Duration,
    /// Maximum backoff value
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff with the specified minimum and maximum durations
    ///
    /// # Arguments
    ///
    /// * `min` - First delay returned, and the value restored by `reset()`
    /// * `max` - Cap for the sequence
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            current: min.min(max),
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self
            .current
            .checked_mul(2)
            .map_or(self.max, |next| next.min(self.max));
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.min.min(self.max);
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
