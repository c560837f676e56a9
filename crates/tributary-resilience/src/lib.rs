//! # Tributary Resilience
//!
//! Backpressure for poll loops: each tick a [`RateLimiter`] decides how many
//! jobs may be fetched and how long to wait before polling again.

pub mod rate_limiter;

pub use rate_limiter::*;
