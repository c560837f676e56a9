//! Runtime options for queues, workers, and the Redis log.

use crate::log::DEFAULT_DEDUPLICATE_WINDOW;
use std::time::Duration;
use tributary_config::{QueueSettings, RedisSettings, WorkerSettings};
use tributary_resilience::{limiter_for, RateLimiter};
use uuid::Uuid;

/// Default delay between poll ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Shortest poll interval and rate-limit window a worker accepts.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Producer options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Log name. Jobs are published on `<name>.<job>`.
    pub name: String,

    /// Deduplication window configured on the log by `setup()`.
    pub deduplicate_window: Duration,
}

impl QueueOptions {
    /// Options for queue `name` with the default deduplication window.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deduplicate_window: DEFAULT_DEDUPLICATE_WINDOW,
        }
    }

    /// Sets the deduplication window. A zero window falls back to the default.
    #[must_use]
    pub fn deduplicate_window(mut self, window: Duration) -> Self {
        self.deduplicate_window = if window.is_zero() {
            DEFAULT_DEDUPLICATE_WINDOW
        } else {
            window
        };
        self
    }
}

impl From<&QueueSettings> for QueueOptions {
    fn from(settings: &QueueSettings) -> Self {
        Self::new(settings.name.clone()).deduplicate_window(settings.deduplicate_window())
    }
}

/// Fixed-window throughput cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Jobs permitted per window.
    pub max: u32,

    /// Window length.
    pub duration: Duration,
}

/// Worker options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Log and durable cursor name.
    pub name: String,

    /// Name of this reader among the readers sharing the cursor.
    pub consumer: String,

    /// Target number of jobs processed at once. Values below 1 are raised to 1.
    pub concurrency: usize,

    /// Delay between poll ticks. Never below [`MIN_INTERVAL`] when set
    /// through the builder.
    pub poll_interval: Duration,

    /// Optional throughput cap.
    pub rate_limit: Option<RateLimit>,
}

impl WorkerOptions {
    /// Options for consuming `name` one job at a time.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            consumer: format!("{name}-{}", Uuid::new_v4().simple()),
            name,
            concurrency: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
            rate_limit: None,
        }
    }

    /// Sets the concurrency target.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the poll interval. Values below [`MIN_INTERVAL`] are raised to it.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Caps throughput at `max` jobs per `duration`.
    ///
    /// `max` is raised to 1 and `duration` to [`MIN_INTERVAL`], so a
    /// configured limit always lets jobs through.
    #[must_use]
    pub fn rate_limit(mut self, max: u32, duration: Duration) -> Self {
        self.rate_limit = Some(RateLimit {
            max: max.max(1),
            duration: duration.max(MIN_INTERVAL),
        });
        self
    }

    /// Sets the consumer name.
    #[must_use]
    pub fn consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// Builds the limiter driving the poll loop.
    pub fn limiter(&self) -> Box<dyn RateLimiter> {
        limiter_for(
            self.poll_interval,
            self.rate_limit.map(|limit| (limit.max, limit.duration)),
        )
    }
}

impl From<&WorkerSettings> for WorkerOptions {
    fn from(settings: &WorkerSettings) -> Self {
        let options = Self::new(settings.name.clone())
            .concurrency(settings.concurrency)
            .poll_interval(settings.poll_interval());

        match settings.rate_limit {
            Some(limit) => options.rate_limit(limit.max, limit.duration()),
            None => options,
        }
    }
}

/// Redis Streams log options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisLogOptions {
    /// Prefix of every key the log writes.
    pub key_prefix: String,

    /// How long a delivered entry may stay unacknowledged before another
    /// fetch claims it again.
    pub ack_wait: Duration,

    /// How long `XREADGROUP` blocks waiting for new entries. Zero means no
    /// blocking; the poll loop already sleeps between ticks.
    pub block: Duration,
}

impl Default for RedisLogOptions {
    fn default() -> Self {
        Self::from(&RedisSettings::default())
    }
}

impl From<&RedisSettings> for RedisLogOptions {
    fn from(settings: &RedisSettings) -> Self {
        Self {
            key_prefix: settings.key_prefix.clone(),
            ack_wait: settings.ack_wait(),
            block: Duration::ZERO,
        }
    }
}
