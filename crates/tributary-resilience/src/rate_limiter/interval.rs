use super::RateLimiter;
use std::time::Duration;

/// Polls every `interval` and never caps the fetch size.
#[derive(Debug, Clone, Copy)]
pub struct IntervalLimiter {
    interval: Duration,
}

impl IntervalLimiter {
    /// Creates a limiter that waits `interval` between ticks.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl RateLimiter for IntervalLimiter {
    fn get(&mut self, requested: usize) -> usize {
        requested
    }

    fn inc(&mut self) {}

    fn timeout(&mut self) -> Duration {
        self.interval
    }
}
