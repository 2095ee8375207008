//! # Fibonacci Backoff
//!
//! Progressive retry intervals for failing resources.
//!
//! The sequence (in minutes) is 1, 1, 2, 3, 5, 8, ... capped at the configured
//! maximum. Each resource owns its own [`FibonacciBackoff`] so a noisy resource
//! never slows down retries of another one.

/// Fibonacci backoff state for one resource
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_minutes: u64,
    max_minutes: u64,
    previous: u64,
    current: u64,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min_minutes` and capped at `max_minutes`
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        let min_minutes = min_minutes.max(1);
        Self {
            min_minutes,
            max_minutes: max_minutes.max(min_minutes),
            previous: 0,
            current: min_minutes,
        }
    }

    /// Return the next backoff in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let minutes = self.current.min(self.max_minutes);
        if self.current < self.max_minutes {
            let next = self.previous.saturating_add(self.current);
            self.previous = self.current;
            self.current = next;
        }
        minutes * 60
    }

    /// Restart the sequence from the minimum
    pub fn reset(&mut self) {
        self.previous = 0;
        self.current = self.min_minutes;
    }

    /// Backoff for the `error_count`-th consecutive error (0-indexed)
    pub fn calculate_for_error_count(
        error_count: u32,
        min_minutes: u64,
        max_minutes: u64,
    ) -> std::time::Duration {
        let mut backoff = Self::new(min_minutes, max_minutes);
        let mut seconds = backoff.next_backoff_seconds();
        for _ in 0..error_count {
            seconds = backoff.next_backoff_seconds();
        }
        std::time::Duration::from_secs(seconds)
    }
}
