//! Process-local durable log.
//!
//! Keeps logs, cursors, and deduplication state in memory behind one lock.
//! Behaves like the Redis log from the worker's point of view: sequences
//! start at 1, publishes are deduplicated inside the log's window, and
//! entries left unacknowledged past `ack_wait` are delivered again.

use crate::error::{JobError, JobResult};
use crate::job::{Delivery, DeliveryMeta, Headers, PublishAck};
use crate::log::{CursorConfig, JobHandle, JobSource, LogConfig, LogService};
use crate::subject;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default redelivery delay for unacknowledged entries.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct StoredMessage {
    sequence: u64,
    subject: String,
    payload: Vec<u8>,
    headers: Headers,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    delivery_count: u32,
    delivered_at: Instant,
}

#[derive(Debug)]
struct CursorState {
    filter: String,
    /// Index of the next unread message.
    position: usize,
    pending: BTreeMap<u64, Pending>,
    terminated: BTreeSet<u64>,
    acknowledged: u64,
}

#[derive(Debug)]
struct LogState {
    config: LogConfig,
    messages: Vec<StoredMessage>,
    dedup: HashMap<String, (u64, Instant)>,
    cursors: HashMap<String, CursorState>,
}

impl LogState {
    fn new(config: LogConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
            dedup: HashMap::new(),
            cursors: HashMap::new(),
        }
    }

    fn delivery(&self, sequence: u64, delivery_count: u32) -> Option<Delivery> {
        let index = usize::try_from(sequence.checked_sub(1)?).ok()?;
        let message = self.messages.get(index)?;
        Some(Delivery {
            subject: message.subject.clone(),
            payload: message.payload.clone(),
            headers: message.headers.clone(),
            meta: DeliveryMeta {
                sequence: message.sequence,
                delivery_count,
                published_at: Some(message.published_at),
            },
        })
    }
}

#[derive(Debug, Default)]
struct State {
    logs: HashMap<String, LogState>,
}

impl State {
    fn log_mut(&mut self, name: &str) -> JobResult<&mut LogState> {
        self.logs
            .get_mut(name)
            .ok_or_else(|| JobError::LogNotFound(name.to_string()))
    }
}

fn cursor_mut<'a>(log: &'a mut LogState, log_name: &str, cursor: &str) -> JobResult<&'a mut CursorState> {
    log.cursors
        .get_mut(cursor)
        .ok_or_else(|| JobError::CursorNotFound {
            log: log_name.to_string(),
            cursor: cursor.to_string(),
        })
}

/// In-memory implementation of [`LogService`].
///
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct InMemoryLog {
    state: Arc<Mutex<State>>,
    ack_wait: Duration,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLog {
    /// Creates an empty log service with the default ack wait.
    pub fn new() -> Self {
        Self::with_ack_wait(DEFAULT_ACK_WAIT)
    }

    /// Creates an empty log service redelivering entries left pending longer
    /// than `ack_wait`.
    pub fn with_ack_wait(ack_wait: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            ack_wait,
        }
    }

    /// Returns the configuration of a log.
    pub fn log_config(&self, log: &str) -> Option<LogConfig> {
        self.state.lock().logs.get(log).map(|l| l.config.clone())
    }

    /// Number of messages stored in a log. Zero for unknown logs.
    pub fn message_count(&self, log: &str) -> usize {
        self.state.lock().logs.get(log).map_or(0, |l| l.messages.len())
    }

    /// Number of delivered, unfinalized entries of a cursor.
    pub fn pending_count(&self, log: &str, cursor: &str) -> usize {
        self.with_cursor(log, cursor, |c| c.pending.len())
    }

    /// Number of entries acknowledged through a cursor.
    pub fn acknowledged_count(&self, log: &str, cursor: &str) -> u64 {
        self.with_cursor(log, cursor, |c| c.acknowledged)
    }

    /// Sequences terminated through a cursor, ascending.
    pub fn terminated(&self, log: &str, cursor: &str) -> Vec<u64> {
        self.with_cursor(log, cursor, |c| c.terminated.iter().copied().collect())
    }

    fn with_cursor<T: Default>(&self, log: &str, cursor: &str, f: impl FnOnce(&CursorState) -> T) -> T {
        self.state
            .lock()
            .logs
            .get(log)
            .and_then(|l| l.cursors.get(cursor))
            .map(f)
            .unwrap_or_default()
    }
}

#[async_trait]
impl LogService for InMemoryLog {
    async fn ensure_log(&self, config: &LogConfig) -> JobResult<()> {
        subject::validate_name(&config.name)?;
        let mut state = self.state.lock();
        match state.logs.get_mut(&config.name) {
            Some(existing) => {
                debug!(log = %config.name, "Updating log");
                existing.config = config.clone();
            }
            None => {
                debug!(log = %config.name, "Creating log");
                state.logs.insert(config.name.clone(), LogState::new(config.clone()));
            }
        }
        Ok(())
    }

    async fn create_log(&self, config: &LogConfig) -> JobResult<()> {
        subject::validate_name(&config.name)?;
        let mut state = self.state.lock();
        if state.logs.contains_key(&config.name) {
            return Err(JobError::AlreadyExists {
                kind: "log",
                name: config.name.clone(),
            });
        }
        debug!(log = %config.name, "Creating log");
        state.logs.insert(config.name.clone(), LogState::new(config.clone()));
        Ok(())
    }

    async fn ensure_cursor(&self, config: &CursorConfig) -> JobResult<()> {
        subject::validate_name(&config.name)?;
        let mut state = self.state.lock();
        let log = state.log_mut(&config.log)?;
        log.cursors.entry(config.name.clone()).or_insert_with(|| {
            debug!(log = %config.log, cursor = %config.name, "Creating cursor");
            CursorState {
                filter: config.filter_subject.clone(),
                position: 0,
                pending: BTreeMap::new(),
                terminated: BTreeSet::new(),
                acknowledged: 0,
            }
        });
        Ok(())
    }

    async fn open_cursor(&self, log: &str, cursor: &str, consumer: &str) -> JobResult<Box<dyn JobSource>> {
        let mut state = self.state.lock();
        let log_state = state.log_mut(log)?;
        cursor_mut(log_state, log, cursor)?;
        trace!(log, cursor, consumer, "Opened cursor");
        Ok(Box::new(InMemorySource {
            state: Arc::clone(&self.state),
            log: log.to_string(),
            cursor: cursor.to_string(),
            ack_wait: self.ack_wait,
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
        let mut state = self.state.lock();
        let log_state = state.log_mut(log)?;

        if !log_state
            .config
            .subjects
            .iter()
            .any(|pattern| subject::matches(pattern, subject))
        {
            return Err(JobError::SubjectNotBound {
                log: log.to_string(),
                subject: subject.to_string(),
            });
        }

        let now = Instant::now();
        log_state.dedup.retain(|_, (_, expires_at)| *expires_at > now);

        if let Some(id) = id {
            if let Some((sequence, _)) = log_state.dedup.get(id) {
                return Ok(PublishAck {
                    sequence: *sequence,
                    duplicate: true,
                });
            }
        }

        let sequence = log_state.messages.len() as u64 + 1;
        log_state.messages.push(StoredMessage {
            sequence,
            subject: subject.to_string(),
            payload,
            headers: headers.clone(),
            published_at: Utc::now(),
        });

        if let Some(id) = id {
            let expires_at = now + log_state.config.duplicate_window;
            log_state.dedup.insert(id.to_string(), (sequence, expires_at));
        }

        Ok(PublishAck {
            sequence,
            duplicate: false,
        })
    }
}

struct InMemorySource {
    state: Arc<Mutex<State>>,
    log: String,
    cursor: String,
    ack_wait: Duration,
}

#[async_trait]
impl JobSource for InMemorySource {
    async fn fetch(&self, max: usize) -> JobResult<Vec<Box<dyn JobHandle>>> {
        let mut state = self.state.lock();
        let log = state.log_mut(&self.log)?;
        let now = Instant::now();

        let mut batch: Vec<(u64, u32)> = Vec::new();
        let LogState {
            messages, cursors, ..
        } = &mut *log;
        let cursor = cursors
            .get_mut(&self.cursor)
            .ok_or_else(|| JobError::CursorNotFound {
                log: self.log.clone(),
                cursor: self.cursor.clone(),
            })?;

        for (sequence, pending) in &mut cursor.pending {
            if batch.len() >= max {
                break;
            }
            if now.duration_since(pending.delivered_at) >= self.ack_wait {
                pending.delivery_count += 1;
                pending.delivered_at = now;
                batch.push((*sequence, pending.delivery_count));
            }
        }

        while batch.len() < max {
            let Some(message) = messages.get(cursor.position) else {
                break;
            };
            cursor.position += 1;
            if !subject::matches(&cursor.filter, &message.subject) {
                continue;
            }
            cursor.pending.insert(
                message.sequence,
                Pending {
                    delivery_count: 1,
                    delivered_at: now,
                },
            );
            batch.push((message.sequence, 1));
        }

        let handles = batch
            .into_iter()
            .filter_map(|(sequence, delivery_count)| log.delivery(sequence, delivery_count))
            .map(|delivery| {
                Box::new(InMemoryHandle {
                    state: Arc::clone(&self.state),
                    log: self.log.clone(),
                    cursor: self.cursor.clone(),
                    delivery,
                }) as Box<dyn JobHandle>
            })
            .collect();

        Ok(handles)
    }
}

struct InMemoryHandle {
    state: Arc<Mutex<State>>,
    log: String,
    cursor: String,
    delivery: Delivery,
}

impl InMemoryHandle {
    fn finalize(&self, terminate: bool) -> JobResult<()> {
        let mut state = self.state.lock();
        let log = state.log_mut(&self.log)?;
        let cursor = cursor_mut(log, &self.log, &self.cursor)?;
        let sequence = self.delivery.meta.sequence;

        if cursor.pending.remove(&sequence).is_none() {
            return Err(JobError::NotPending {
                cursor: self.cursor.clone(),
                sequence,
            });
        }
        if terminate {
            cursor.terminated.insert(sequence);
        } else {
            cursor.acknowledged += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandle for InMemoryHandle {
    fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    async fn acknowledge(self: Box<Self>) -> JobResult<()> {
        self.finalize(false)
    }

    async fn terminate(self: Box<Self>) -> JobResult<()> {
        self.finalize(true)
    }
}
