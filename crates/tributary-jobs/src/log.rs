//! Contract with the durable log service.
//!
//! The queue and the worker only talk to the log through these traits.
//! [`InMemoryLog`](crate::memory::InMemoryLog) and
//! [`RedisLog`](crate::redis::RedisLog) implement them.

use crate::error::JobResult;
use crate::job::{Delivery, Headers, PublishAck};
use async_trait::async_trait;
use std::time::Duration;

/// Default deduplication window of a log.
pub const DEFAULT_DEDUPLICATE_WINDOW: Duration = Duration::from_millis(2_000);

/// Definition of a durable log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log name.
    pub name: String,

    /// Subject patterns routed into the log.
    pub subjects: Vec<String>,

    /// Window inside which publishes with the same idempotency key collapse.
    pub duplicate_window: Duration,
}

impl LogConfig {
    /// A log bound to one subject pattern.
    pub fn new(name: impl Into<String>, subject: impl Into<String>, duplicate_window: Duration) -> Self {
        Self {
            name: name.into(),
            subjects: vec![subject.into()],
            duplicate_window,
        }
    }
}

/// Definition of a durable cursor over a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorConfig {
    /// Log the cursor reads.
    pub log: String,

    /// Durable cursor name, shared by every worker of the same group.
    pub name: String,

    /// Only subjects matching this pattern are delivered.
    pub filter_subject: String,
}

/// Administrative and publishing side of the log service.
#[async_trait]
pub trait LogService: Send + Sync {
    /// Creates the log, or updates its subjects and deduplication window if
    /// it already exists.
    async fn ensure_log(&self, config: &LogConfig) -> JobResult<()>;

    /// Creates the log. Fails with [`JobError::AlreadyExists`] if it exists.
    ///
    /// [`JobError::AlreadyExists`]: crate::JobError::AlreadyExists
    async fn create_log(&self, config: &LogConfig) -> JobResult<()>;

    /// Creates the durable cursor, or leaves an existing one untouched.
    async fn ensure_cursor(&self, config: &CursorConfig) -> JobResult<()>;

    /// Opens a pull source over an existing durable cursor.
    ///
    /// `consumer` names this reader among the readers sharing the cursor.
    async fn open_cursor(&self, log: &str, cursor: &str, consumer: &str) -> JobResult<Box<dyn JobSource>>;

    /// Appends a message.
    async fn publish(
        &self,
        log: &str,
        subject: &str,
        payload: Vec<u8>,
        id: Option<&str>,
        headers: &Headers,
    ) -> JobResult<PublishAck>;
}

/// A pull source bound to one durable cursor.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Fetches at most `max` jobs. May return fewer, including none.
    async fn fetch(&self, max: usize) -> JobResult<Vec<Box<dyn JobHandle>>>;
}

/// One delivered, not yet finalized message.
///
/// Exactly one of [`acknowledge`](JobHandle::acknowledge) and
/// [`terminate`](JobHandle::terminate) should be called. Both consume the
/// handle. Dropping it without either leaves the message pending until the
/// log redelivers it.
#[async_trait]
pub trait JobHandle: Send {
    /// The delivered message.
    fn delivery(&self) -> &Delivery;

    /// Marks the message processed.
    async fn acknowledge(self: Box<Self>) -> JobResult<()>;

    /// Marks the message permanently failed. It will not be redelivered.
    async fn terminate(self: Box<Self>) -> JobResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_new() {
        let config = LogConfig::new("emails", "emails.*", DEFAULT_DEDUPLICATE_WINDOW);
        assert_eq!(config.subjects, vec!["emails.*".to_string()]);
        assert_eq!(config.duplicate_window, Duration::from_secs(2));
    }
}
