//! Application configuration structures.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tributary_core::{TelemetryConfig, TributaryError};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Redis connection used by the Redis Streams log.
    #[serde(default)]
    pub redis: RedisSettings,

    /// Producer (queue) settings.
    #[serde(default)]
    pub queue: QueueSettings,

    /// Worker settings.
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Checks invariants the worker and queue rely on.
    pub fn validate(&self) -> Result<(), TributaryError> {
        if self.queue.name.trim().is_empty() {
            return Err(TributaryError::validation("queue.name must not be empty"));
        }
        if self.worker.name.trim().is_empty() {
            return Err(TributaryError::validation("worker.name must not be empty"));
        }
        if self.worker.concurrency == 0 {
            return Err(TributaryError::validation(
                "worker.concurrency must be at least 1",
            ));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(TributaryError::validation(
                "worker.poll_interval_ms must be greater than 0",
            ));
        }
        if let Some(rate_limit) = &self.worker.rate_limit {
            if rate_limit.max == 0 {
                return Err(TributaryError::validation(
                    "worker.rate_limit.max must be at least 1",
                ));
            }
            if rate_limit.duration_ms == 0 {
                return Err(TributaryError::validation(
                    "worker.rate_limit.duration_ms must be greater than 0",
                ));
            }
        }
        if self.redis.url.is_empty() {
            return Err(TributaryError::configuration("redis.url is required"));
        }
        if self.redis.pool_size == 0 {
            return Err(TributaryError::validation(
                "redis.pool_size must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "tributary".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key prefix for every log, cursor, and dedup key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// How long a delivered entry may stay unacknowledged before it is
    /// redelivered, in milliseconds.
    #[serde(default = "default_ack_wait")]
    pub ack_wait_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
            ack_wait_ms: default_ack_wait(),
        }
    }
}

impl RedisSettings {
    /// Returns the ack wait as a Duration.
    #[must_use]
    pub const fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "tributary".to_string()
}

fn default_ack_wait() -> u64 {
    30_000
}

/// Producer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Name of the durable log jobs are appended to.
    #[serde(default = "default_name")]
    pub name: String,

    /// Window in which a repeated idempotency key is reported as a duplicate,
    /// in milliseconds.
    #[serde(default = "default_deduplicate_window")]
    pub deduplicate_window_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            deduplicate_window_ms: default_deduplicate_window(),
        }
    }
}

impl QueueSettings {
    /// Returns the deduplication window as a Duration.
    #[must_use]
    pub const fn deduplicate_window(&self) -> Duration {
        Duration::from_millis(self.deduplicate_window_ms)
    }
}

fn default_name() -> String {
    "default".to_string()
}

fn default_deduplicate_window() -> u64 {
    2_000
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Log (and durable cursor) name the worker consumes.
    #[serde(default = "default_name")]
    pub name: String,

    /// Target number of jobs processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay between poll ticks in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Optional throughput cap; absent means "poll every interval".
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            rate_limit: None,
        }
    }
}

impl WorkerSettings {
    /// Returns the poll interval as a Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_poll_interval() -> u64 {
    150
}

/// Fixed-window rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Jobs permitted per window.
    pub max: u32,
    /// Window length in milliseconds.
    pub duration_ms: u64,
}

impl RateLimitSettings {
    /// Returns the window length as a Duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.queue.deduplicate_window_ms, 2_000);
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.worker.poll_interval(), Duration::from_millis(150));
        assert!(config.worker.rate_limit.is_none());
        assert_eq!(config.redis.key_prefix, "tributary");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.worker.concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_validate_rejects_empty_rate_limit() {
        let mut config = AppConfig::default();
        config.worker.rate_limit = Some(RateLimitSettings {
            max: 0,
            duration_ms: 1_000,
        });
        assert!(config.validate().is_err());

        config.worker.rate_limit = Some(RateLimitSettings {
            max: 10,
            duration_ms: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_queue_name() {
        let mut config = AppConfig::default();
        config.queue.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_duration() {
        let limit = RateLimitSettings {
            max: 5,
            duration_ms: 2_500,
        };
        assert_eq!(limit.duration(), Duration::from_millis(2_500));
    }
}
