//! Redis Streams backed durable log.

mod streams;

pub use streams::RedisLog;

use crate::error::{JobError, JobResult};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;
use tributary_config::RedisSettings;

/// Create a Redis connection pool.
pub async fn create_pool(settings: &RedisSettings) -> JobResult<Pool> {
    info!("Creating Redis connection pool for the job log...");

    let cfg = Config::from_url(&settings.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {e}")))?
        .max_size(settings.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {e}")))?;

    // Test connection
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for logs and cursors.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Stream holding the log's messages.
    pub fn stream(&self, log: &str) -> String {
        format!("{}:log:{}", self.prefix, log)
    }

    /// Hash with the log definition (`subjects`, `duplicate_window_ms`).
    pub fn meta(&self, log: &str) -> String {
        format!("{}:log:{}:meta", self.prefix, log)
    }

    /// Counter handing out sequences.
    pub fn sequence(&self, log: &str) -> String {
        format!("{}:log:{}:seq", self.prefix, log)
    }

    /// Deduplication marker for one idempotency key.
    pub fn dedup(&self, log: &str, id: &str) -> String {
        format!("{}:log:{}:dedup:{}", self.prefix, log, id)
    }

    /// Stream recording terminated entries.
    pub fn terminated(&self, log: &str) -> String {
        format!("{}:log:{}:terminated", self.prefix, log)
    }

    /// Hash with a cursor definition (`filter`).
    pub fn cursor(&self, log: &str, cursor: &str) -> String {
        format!("{}:log:{}:cursor:{}", self.prefix, log, cursor)
    }
}
