//! Producer side: appending jobs to a durable log.

use crate::config::QueueOptions;
use crate::error::JobResult;
use crate::job::{AddOptions, Job, JobEnvelope, PublishAck};
use crate::log::{LogConfig, LogService};
use crate::metrics::JobMetrics;
use crate::subject;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Publishes jobs to the log named after the queue.
///
/// The queue holds no state beyond its options; any number of producers may
/// publish to the same log.
pub struct Queue {
    log: Arc<dyn LogService>,
    options: QueueOptions,
}

impl Queue {
    /// Creates a queue publishing through `log`.
    pub fn new(log: Arc<dyn LogService>, options: QueueOptions) -> Self {
        Self { log, options }
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Creates the log `<name>` bound to `<name>.*`, or updates it to the
    /// configured deduplication window if it already exists.
    pub async fn setup(&self) -> JobResult<()> {
        subject::validate_name(&self.options.name)?;
        let config = LogConfig::new(
            self.options.name.clone(),
            subject::wildcard_subject(&self.options.name),
            self.options.deduplicate_window,
        );
        self.log.ensure_log(&config).await?;

        info!(
            queue = %self.options.name,
            deduplicate_window_ms = self.options.deduplicate_window.as_millis() as u64,
            "Queue set up"
        );
        Ok(())
    }

    /// Serializes `data` as JSON and publishes it on `<queue>.<name>`.
    pub async fn add<T>(&self, name: &str, data: &T, options: AddOptions) -> JobResult<PublishAck>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(data)?;
        self.publish(name, payload, options).await
    }

    /// Publishes a typed job with its own idempotency key and headers.
    pub async fn enqueue<J: Job>(&self, job: &J) -> JobResult<PublishAck> {
        let envelope = JobEnvelope::new(job)?;
        self.publish(envelope.name, envelope.payload, envelope.options).await
    }

    async fn publish(&self, name: &str, payload: Vec<u8>, options: AddOptions) -> JobResult<PublishAck> {
        subject::validate_name(name)?;
        let subject = subject::job_subject(&self.options.name, name);

        let ack = self
            .log
            .publish(
                &self.options.name,
                &subject,
                payload,
                options.id.as_deref(),
                &options.headers,
            )
            .await?;

        JobMetrics::job_published(&self.options.name, name, ack.duplicate);
        debug!(
            queue = %self.options.name,
            job_name = name,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Job published"
        );

        Ok(ack)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("options", &self.options).finish_non_exhaustive()
    }
}
