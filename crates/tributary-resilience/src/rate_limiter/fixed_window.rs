use super::{Clock, RateLimiter, SystemClock};
use std::time::Duration;
use tracing::trace;

/// Caps dispatched jobs per epoch-aligned window of fixed length.
///
/// The window identifier is `now - now % window`. Window accounting only
/// advances inside [`RateLimiter::timeout`]: `get` reads the current count but
/// never rolls the window over.
///
/// When a window fills up, `timeout` closes it early. The count is cleared,
/// the window marker jumps to the start of the next window, and the returned
/// delay lasts until that window opens (never less than the poll interval).
/// While closed, `get` permits nothing.
#[derive(Debug)]
pub struct FixedWindowLimiter<C: Clock = SystemClock> {
    max: u64,
    window_ms: u64,
    interval: Duration,
    count: u64,
    window_start: u64,
    closed: bool,
    clock: C,
}

impl FixedWindowLimiter<SystemClock> {
    /// Creates a limiter permitting `max` jobs per `window`, polling every
    /// `interval` otherwise.
    #[must_use]
    pub fn new(max: u32, window: Duration, interval: Duration) -> Self {
        Self::with_clock(max, window, interval, SystemClock)
    }
}

impl<C: Clock> FixedWindowLimiter<C> {
    /// Same as [`FixedWindowLimiter::new`] but reading time from `clock`.
    ///
    /// A zero-length window is treated as one millisecond. Accounting starts
    /// in the window containing the construction time, so jobs dispatched
    /// before the first `timeout` count against that window.
    #[must_use]
    pub fn with_clock(max: u32, window: Duration, interval: Duration, clock: C) -> Self {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let now = clock.now_millis();
        Self {
            max: u64::from(max),
            window_ms,
            interval,
            count: 0,
            window_start: now - now % window_ms,
            closed: false,
            clock,
        }
    }

    /// Jobs recorded in the current window.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Start of the window currently being accounted, in epoch milliseconds.
    #[must_use]
    pub const fn window_start(&self) -> u64 {
        self.window_start
    }

    /// Whether the window was closed early and the next one has not opened.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn window_of(&self, now: u64) -> u64 {
        now - (now % self.window_ms)
    }

    fn until(&self, at: u64, now: u64) -> Duration {
        Duration::from_millis(at.saturating_sub(now)).max(self.interval)
    }
}

impl<C: Clock> RateLimiter for FixedWindowLimiter<C> {
    fn get(&mut self, requested: usize) -> usize {
        if self.closed {
            return 0;
        }
        let remaining = self.max.saturating_sub(self.count);
        usize::try_from(remaining).map_or(requested, |remaining| remaining.min(requested))
    }

    fn inc(&mut self) {
        self.count += 1;
    }

    fn timeout(&mut self) -> Duration {
        let now = self.clock.now_millis();
        let current = self.window_of(now);

        if self.closed {
            if current < self.window_start {
                return self.until(self.window_start, now);
            }
            self.closed = false;
        }

        if current != self.window_start {
            trace!(window_start = current, previous = self.window_start, "rate limit window rolled over");
            self.count = 0;
            self.window_start = current;
        }

        if self.count >= self.max {
            self.count = 0;
            self.window_start = current + self.window_ms;
            self.closed = true;
            trace!(opens_at = self.window_start, "rate limit window exhausted");
            return self.until(self.window_start, now);
        }

        self.interval
    }
}
