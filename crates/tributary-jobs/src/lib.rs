//! Tributary Jobs - job queue over a durable log
//!
//! A producer appends jobs to a named, subject-addressed durable log with
//! idempotent deduplication. A worker pulls them from a durable cursor:
//! - bounded concurrency, enforced by shrinking each fetch
//! - optional fixed-window rate limiting
//! - acknowledge on success, terminate on failure or panic
//! - graceful drain on stop
//!
//! Delivery is at-least-once. Two log backends ship with the crate: an
//! in-memory log and a Redis Streams log.
//!
//! # Architecture
//!
//! ```text
//!   Queue::add ──publish──▶ ┌──────────────────────┐
//!                           │     durable log      │
//!                           │  <queue>.<job> ...   │
//!                           └──────────┬───────────┘
//!                                      │ durable cursor
//!                                      ▼
//!   ┌──────────────────────── Worker poll loop ────────────────────────┐
//!   │  budget = concurrency - in_flight                                │
//!   │  n = limiter.get(budget) ─▶ fetch(n) ─▶ spawn task per job       │
//!   │  sleep(limiter.timeout())                                        │
//!   └───────────────────────────────┬──────────────────────────────────┘
//!                                   ▼
//!                processor(delivery) ─ Ok ─▶ acknowledge
//!                                    └ Err/panic ─▶ terminate
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tributary_jobs::prelude::*;
//!
//! let log: Arc<dyn LogService> = Arc::new(InMemoryLog::new());
//!
//! let queue = Queue::new(log.clone(), QueueOptions::new("emails"));
//! queue.setup().await?;
//! queue.add("send", &serde_json::json!({ "to": "a@example.com" }), AddOptions::with_id("X")).await?;
//!
//! let worker = Worker::new(
//!     log,
//!     WorkerOptions::new("emails").concurrency(4).rate_limit(100, Duration::from_secs(1)),
//!     processor(|delivery| async move {
//!         tracing::info!(job = delivery.job_name(), "sending");
//!         Ok(())
//!     }),
//! );
//! worker.setup().await?;
//! worker.start()?;
//! // ...
//! worker.stop().await;
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod log;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod redis;
pub mod subject;
pub mod worker;

pub use config::{QueueOptions, RateLimit, RedisLogOptions, WorkerOptions};
pub use error::{JobError, JobResult};
pub use job::{AddOptions, Delivery, DeliveryMeta, Headers, Job, PublishAck};
pub use log::{CursorConfig, JobHandle, JobSource, LogConfig, LogService, DEFAULT_DEDUPLICATE_WINDOW};
pub use memory::InMemoryLog;
pub use queue::Queue;
pub use crate::redis::RedisLog;
pub use worker::{processor, JobProcessor, Worker, WorkerState, WorkerStats};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{QueueOptions, WorkerOptions};
    pub use crate::error::{JobError, JobResult};
    pub use crate::job::{AddOptions, Delivery, Job};
    pub use crate::log::LogService;
    pub use crate::memory::InMemoryLog;
    pub use crate::queue::Queue;
    pub use crate::worker::{processor, Worker, WorkerState};
    pub use std::time::Duration;
}
