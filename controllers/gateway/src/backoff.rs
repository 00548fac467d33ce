//! # Exponential Backoff
//!
//! Provides the exponential backoff used for transient reconcile errors.
//! The sequence doubles from a minimum delay and is capped at a bounded
//! maximum, so a persistently failing key settles at the cap instead of
//! growing without bound.
//!
//! Default sequence: 1s, 2s, 4s, 8s, ... capped at 300s.

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each call to [`next_backoff`](Self::next_backoff) returns the current
/// delay and doubles it for the next call, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff (for reset)
    min: Duration,
    /// Current backoff value
    current: Duration,
    /// Maximum backoff value
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given bounds.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        result
    }

    /// Reset the backoff to the initial state.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Calculate the backoff duration for a given error count (stateless)
    ///
    /// Returns `min * 2^error_count`, capped at `max`. Useful for one-off
    /// calculations when no per-key state is tracked.
    #[must_use]
    #[allow(dead_code)] // Utility method, may be useful in the future
    pub fn for_error_count(error_count: u32, min: Duration, max: Duration) -> Duration {
        let factor = 2u32.saturating_pow(error_count);
        std::cmp::min(min.saturating_mul(factor), max)
    }
}
