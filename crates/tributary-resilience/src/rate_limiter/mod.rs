//! Rate limiters driving a worker's poll loop.
//!
//! A limiter is consulted three times per tick:
//!
//! ```text
//!   permitted = limiter.get(budget)      how many jobs to ask for
//!   limiter.inc()                        once per job actually dispatched
//!   sleep(limiter.timeout())             when to poll again
//! ```
//!
//! Keeping the three calls separate lets one loop body serve both the
//! unlimited and the capped case.

mod clock;
mod fixed_window;
mod interval;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fixed_window::FixedWindowLimiter;
pub use interval::IntervalLimiter;

use std::time::Duration;

/// Per-tick fetch budget and poll pacing.
///
/// Limiters are owned by a single poll loop and are never shared, hence
/// `&mut self` everywhere.
pub trait RateLimiter: Send + std::fmt::Debug {
    /// Number of jobs permitted this tick, always within `0..=requested`.
    fn get(&mut self, requested: usize) -> usize;

    /// Record that one permitted job was dispatched.
    fn inc(&mut self);

    /// Delay before the next tick.
    fn timeout(&mut self) -> Duration;
}

/// Pick the limiter for a poll interval and an optional `(max, window)` cap.
#[must_use]
pub fn limiter_for(poll_interval: Duration, rate_limit: Option<(u32, Duration)>) -> Box<dyn RateLimiter> {
    match rate_limit {
        Some((max, window)) => Box::new(FixedWindowLimiter::new(max, window, poll_interval)),
        None => Box::new(IntervalLimiter::new(poll_interval)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_for_without_rate_limit_is_unbounded() {
        let mut limiter = limiter_for(Duration::from_millis(150), None);
        assert_eq!(limiter.get(1_000), 1_000);
        assert_eq!(limiter.timeout(), Duration::from_millis(150));
    }

    #[test]
    fn test_limiter_for_with_rate_limit_caps_budget() {
        let mut limiter = limiter_for(
            Duration::from_millis(150),
            Some((3, Duration::from_secs(60))),
        );
        assert_eq!(limiter.get(10), 3);
    }
}
