//! [`LogService`] over Redis Streams.
//!
//! A log is a stream plus a metadata hash. Sequences come from an `INCR`
//! counter so they start at 1 and stay dense, independent of stream IDs.
//! Durable cursors are consumer groups; a cursor's subject filter is kept in
//! its own hash and applied on read.

use super::RedisKeys;
use crate::config::RedisLogOptions;
use crate::error::{JobError, JobResult};
use crate::job::{Delivery, DeliveryMeta, Headers, PublishAck};
use crate::log::{CursorConfig, JobHandle, JobSource, LogConfig, LogService};
use crate::subject;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::Script;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Appends one message, honouring the log's deduplication window.
///
/// KEYS: stream, meta, sequence, [dedup]
/// ARGV: subject, payload, headers (JSON), published_at (epoch ms)
/// Returns `{sequence, duplicate}`.
const PUBLISH_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[2]) == 0 then
  return redis.error_reply('NOLOG log does not exist')
end
local dedup = KEYS[4]
if dedup then
  local existing = redis.call('GET', dedup)
  if existing then
    return {tonumber(existing), 1}
  end
end
local seq = redis.call('INCR', KEYS[3])
redis.call('XADD', KEYS[1], '*',
  'subject', ARGV[1], 'seq', seq, 'payload', ARGV[2],
  'headers', ARGV[3], 'published_at', ARGV[4])
if dedup then
  local window = tonumber(redis.call('HGET', KEYS[2], 'duplicate_window_ms')) or 2000
  redis.call('SET', dedup, seq, 'PX', window)
end
return {seq, 0}
";

fn window_millis(config: &LogConfig) -> u64 {
    u64::try_from(config.duplicate_window.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

/// Redis Streams implementation of [`LogService`].
#[derive(Clone)]
pub struct RedisLog {
    pool: Pool,
    keys: RedisKeys,
    options: RedisLogOptions,
    publish_script: Arc<Script>,
}

impl RedisLog {
    /// Creates a log service on an existing pool.
    pub fn new(pool: Pool, options: RedisLogOptions) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(options.key_prefix.clone()),
            options,
            publish_script: Arc::new(Script::new(PUBLISH_SCRIPT)),
        }
    }

    /// Connects using application settings.
    pub async fn connect(settings: &tributary_config::RedisSettings) -> JobResult<Self> {
        let pool = super::create_pool(settings).await?;
        Ok(Self::new(pool, RedisLogOptions::from(settings)))
    }

    /// Key builder used by this log.
    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    async fn subjects(&self, log: &str) -> JobResult<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = redis::cmd("HGET")
            .arg(self.keys.meta(log))
            .arg("subjects")
            .query_async(&mut *conn)
            .await?;
        let raw = raw.ok_or_else(|| JobError::LogNotFound(log.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl LogService for RedisLog {
    async fn ensure_log(&self, config: &LogConfig) -> JobResult<()> {
        subject::validate_name(&config.name)?;
        let subjects = serde_json::to_string(&config.subjects)?;
        let mut conn = self.pool.get().await?;

        let _: () = redis::cmd("HSET")
            .arg(self.keys.meta(&config.name))
            .arg("subjects")
            .arg(subjects)
            .arg("duplicate_window_ms")
            .arg(window_millis(config))
            .query_async(&mut *conn)
            .await?;

        debug!(log = %config.name, "Log ensured");
        Ok(())
    }

    async fn create_log(&self, config: &LogConfig) -> JobResult<()> {
        subject::validate_name(&config.name)?;
        let subjects = serde_json::to_string(&config.subjects)?;
        let meta = self.keys.meta(&config.name);
        let mut conn = self.pool.get().await?;

        let created: bool = redis::cmd("HSETNX")
            .arg(&meta)
            .arg("subjects")
            .arg(subjects)
            .query_async(&mut *conn)
            .await?;
        if !created {
            return Err(JobError::AlreadyExists {
                kind: "log",
                name: config.name.clone(),
            });
        }

        let _: bool = redis::cmd("HSETNX")
            .arg(&meta)
            .arg("duplicate_window_ms")
            .arg(window_millis(config))
            .query_async(&mut *conn)
            .await?;

        debug!(log = %config.name, "Log created");
        Ok(())
    }

    async fn ensure_cursor(&self, config: &CursorConfig) -> JobResult<()> {
        subject::validate_name(&config.name)?;
        let mut conn = self.pool.get().await?;

        let exists: bool = redis::cmd("EXISTS")
            .arg(self.keys.meta(&config.log))
            .query_async(&mut *conn)
            .await?;
        if !exists {
            return Err(JobError::LogNotFound(config.log.clone()));
        }

        // "0" delivers the whole log to a new group. MKSTREAM covers logs
        // nothing has been published to yet.
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.keys.stream(&config.log))
            .arg(&config.name)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;
        match created {
            Ok(()) => debug!(log = %config.log, cursor = %config.name, "Cursor created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                trace!(log = %config.log, cursor = %config.name, "Cursor already exists");
            }
            Err(e) => return Err(e.into()),
        }

        let _: bool = redis::cmd("HSETNX")
            .arg(self.keys.cursor(&config.log, &config.name))
            .arg("filter")
            .arg(&config.filter_subject)
            .query_async(&mut *conn)
            .await?;

        Ok(())
    }

    async fn open_cursor(&self, log: &str, cursor: &str, consumer: &str) -> JobResult<Box<dyn JobSource>> {
        let mut conn = self.pool.get().await?;
        let filter: Option<String> = redis::cmd("HGET")
            .arg(self.keys.cursor(log, cursor))
            .arg("filter")
            .query_async(&mut *conn)
            .await?;
        let filter = filter.ok_or_else(|| JobError::CursorNotFound {
            log: log.to_string(),
            cursor: cursor.to_string(),
        })?;

        Ok(Box::new(RedisSource {
            pool: self.pool.clone(),
            stream: self.keys.stream(log),
            terminated: self.keys.terminated(log),
            group: cursor.to_string(),
            consumer: consumer.to_string(),
            filter,
            options: self.options.clone(),
        }))
    }

    async fn publish(
        &self,
        log: &str,
        subject: &str,
        payload: Vec<u8>,
        id: Option<&str>,
        headers: &Headers,
    ) -> JobResult<PublishAck> {
        let subjects = self.subjects(log).await?;
        if !subjects.iter().any(|pattern| subject::matches(pattern, subject)) {
            return Err(JobError::SubjectNotBound {
                log: log.to_string(),
                subject: subject.to_string(),
            });
        }

        let mut invocation = self.publish_script.prepare_invoke();
        invocation
            .key(self.keys.stream(log))
            .key(self.keys.meta(log))
            .key(self.keys.sequence(log));
        if let Some(id) = id {
            invocation.key(self.keys.dedup(log, id));
        }
        invocation
            .arg(subject)
            .arg(payload)
            .arg(serde_json::to_string(headers)?)
            .arg(Utc::now().timestamp_millis());

        let mut conn = self.pool.get().await?;
        let reply: redis::RedisResult<(u64, u8)> = invocation.invoke_async(&mut *conn).await;
        let (sequence, duplicate) = match reply {
            Ok(reply) => reply,
            Err(e) if e.code() == Some("NOLOG") => return Err(JobError::LogNotFound(log.to_string())),
            Err(e) => return Err(e.into()),
        };

        Ok(PublishAck {
            sequence,
            duplicate: duplicate == 1,
        })
    }
}

struct RedisSource {
    pool: Pool,
    stream: String,
    terminated: String,
    group: String,
    consumer: String,
    filter: String,
    options: RedisLogOptions,
}

impl RedisSource {
    fn ack_wait_millis(&self) -> u64 {
        u64::try_from(self.options.ack_wait.as_millis()).unwrap_or(u64::MAX)
    }

    /// Claims entries other readers left unacknowledged past the ack wait.
    async fn claim_stale(&self, conn: &mut deadpool_redis::Connection, max: usize) -> JobResult<Vec<(StreamId, u32)>> {
        let min_idle = self.ack_wait_millis();
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("IDLE")
            .arg(min_idle)
            .arg("-")
            .arg("+")
            .arg(max)
            .query_async(&mut **conn)
            .await?;
        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(min_idle)
            .arg(&ids)
            .query_async(&mut **conn)
            .await?;

        // XCLAIM bumps the delivery counter that XPENDING reported.
        Ok(claimed
            .ids
            .into_iter()
            .map(|entry| {
                let delivered = pending
                    .ids
                    .iter()
                    .find(|p| p.id == entry.id)
                    .map_or(1, |p| p.times_delivered + 1);
                (entry, u32::try_from(delivered).unwrap_or(u32::MAX))
            })
            .collect())
    }

    async fn read_new(&self, conn: &mut deadpool_redis::Connection, max: usize) -> JobResult<Vec<(StreamId, u32)>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(max);
        if !self.options.block.is_zero() {
            cmd.arg("BLOCK").arg(self.options.block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(">");

        let reply: Option<StreamReadReply> = cmd.query_async(&mut **conn).await?;
        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(|entry| (entry, 1))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn to_delivery(entry: &StreamId, delivery_count: u32) -> JobResult<Delivery> {
        let malformed = |reason: &str| JobError::MalformedEntry {
            id: entry.id.clone(),
            reason: reason.to_string(),
        };

        let subject: String = entry.get("subject").ok_or_else(|| malformed("missing subject"))?;
        let sequence: u64 = entry.get("seq").ok_or_else(|| malformed("missing seq"))?;
        let payload: Vec<u8> = entry.get("payload").unwrap_or_default();
        let headers: Headers = match entry.get::<String>("headers") {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Headers::new(),
        };
        let published_at = entry
            .get::<i64>("published_at")
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Ok(Delivery {
            subject,
            payload,
            headers,
            meta: DeliveryMeta {
                sequence,
                delivery_count,
                published_at,
            },
        })
    }

    /// Splits fetched entries into deliverable ones and ids to drop, either
    /// malformed or outside the cursor filter.
    fn sort_entries(filter: &str, entries: Vec<(StreamId, u32)>) -> (Vec<(String, Delivery)>, Vec<String>) {
        let mut accepted = Vec::with_capacity(entries.len());
        let mut discarded = Vec::new();
        for (entry, delivery_count) in entries {
            match Self::to_delivery(&entry, delivery_count) {
                Ok(delivery) if subject::matches(filter, &delivery.subject) => {
                    accepted.push((entry.id, delivery));
                }
                Ok(delivery) => {
                    trace!(subject = %delivery.subject, filter = %filter, "Skipping entry outside cursor filter");
                    discarded.push(entry.id);
                }
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "Dropping malformed entry");
                    discarded.push(entry.id);
                }
            }
        }
        (accepted, discarded)
    }

    /// Acknowledges an entry the cursor will never deliver. A failure leaves
    /// it pending and only costs a later reclaim, so it does not fail the fetch.
    async fn discard(&self, conn: &mut deadpool_redis::Connection, entry_id: &str) {
        let acked: Result<u64, redis::RedisError> = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(entry_id)
            .query_async(&mut **conn)
            .await;
        if let Err(e) = acked {
            warn!(stream = %self.stream, id = %entry_id, error = %e, "Failed to drop entry");
        }
    }
}

#[async_trait]
impl JobSource for RedisSource {
    async fn fetch(&self, max: usize) -> JobResult<Vec<Box<dyn JobHandle>>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;

        let mut entries = self.claim_stale(&mut conn, max).await?;
        if entries.len() < max {
            let remaining = max - entries.len();
            entries.extend(self.read_new(&mut conn, remaining).await?);
        }

        let (accepted, discarded) = Self::sort_entries(&self.filter, entries);
        for entry_id in &discarded {
            self.discard(&mut conn, entry_id).await;
        }

        let handles = accepted
            .into_iter()
            .map(|(entry_id, delivery)| {
                Box::new(RedisJobHandle {
                    pool: self.pool.clone(),
                    stream: self.stream.clone(),
                    terminated: self.terminated.clone(),
                    group: self.group.clone(),
                    entry_id,
                    delivery,
                }) as Box<dyn JobHandle>
            })
            .collect();

        Ok(handles)
    }
}

struct RedisJobHandle {
    pool: Pool,
    stream: String,
    terminated: String,
    group: String,
    entry_id: String,
    delivery: Delivery,
}

impl RedisJobHandle {
    async fn xack(&self, conn: &mut deadpool_redis::Connection) -> JobResult<()> {
        let acked: u64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.entry_id)
            .query_async(&mut **conn)
            .await?;
        if acked == 0 {
            return Err(JobError::NotPending {
                cursor: self.group.clone(),
                sequence: self.delivery.meta.sequence,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandle for RedisJobHandle {
    fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    async fn acknowledge(self: Box<Self>) -> JobResult<()> {
        let mut conn = self.pool.get().await?;
        self.xack(&mut conn).await
    }

    async fn terminate(self: Box<Self>) -> JobResult<()> {
        let mut conn = self.pool.get().await?;
        self.xack(&mut conn).await?;

        let _: String = redis::cmd("XADD")
            .arg(&self.terminated)
            .arg("*")
            .arg("cursor")
            .arg(&self.group)
            .arg("entry_id")
            .arg(&self.entry_id)
            .arg("seq")
            .arg(self.delivery.meta.sequence)
            .arg("subject")
            .arg(&self.delivery.subject)
            .arg("terminated_at")
            .arg(Utc::now().to_rfc3339())
            .query_async(&mut *conn)
            .await?;

        debug!(stream = %self.stream, seq = self.delivery.meta.sequence, "Entry terminated");
        Ok(())
    }
}
