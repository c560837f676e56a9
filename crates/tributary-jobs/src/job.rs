//! Job and delivery types.

use crate::error::JobResult;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Message headers forwarded with a published job.
pub type Headers = BTreeMap<String, String>;

/// Trait for typed jobs published through [`Queue::enqueue`](crate::Queue::enqueue).
///
/// # Example
///
/// ```rust,ignore
/// use serde::{Deserialize, Serialize};
/// use tributary_jobs::Job;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// impl Job for SendEmail {
///     const NAME: &'static str = "send_email";
///
///     fn idempotency_key(&self) -> Option<String> {
///         Some(format!("send_email:{}", self.to))
///     }
/// }
/// ```
pub trait Job: Serialize + DeserializeOwned + Send + Sync {
    /// Job name, used as the last subject token.
    const NAME: &'static str;

    /// Deduplication key recognized by the log within its window.
    fn idempotency_key(&self) -> Option<String> {
        None
    }

    /// Extra headers sent along with the payload.
    fn headers(&self) -> Headers {
        Headers::new()
    }
}

/// Per-publish options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Idempotency key. Two publishes with the same key inside the
    /// deduplication window store one message.
    pub id: Option<String>,

    /// Headers forwarded with the payload.
    pub headers: Headers,
}

impl AddOptions {
    /// Options with an idempotency key.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            headers: Headers::new(),
        }
    }

    /// Options with a fresh time-ordered idempotency key.
    ///
    /// Useful when the caller retries `add` after a transport error and
    /// wants the retry collapsed into the first attempt.
    pub fn with_generated_id() -> Self {
        Self::with_id(Uuid::now_v7().to_string())
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Acknowledgement of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    /// Sequence of the stored message. For duplicates, the sequence of the
    /// message stored by the first publish.
    pub sequence: u64,

    /// True when the log dropped this publish as a duplicate.
    pub duplicate: bool,
}

/// Delivery metadata supplied by the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMeta {
    /// Log sequence of the message.
    pub sequence: u64,

    /// How many times this message was delivered, starting at 1.
    pub delivery_count: u32,

    /// When the message was appended, if the log records it.
    pub published_at: Option<DateTime<Utc>>,
}

/// One delivered message handed to a processor.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Subject the message was published on.
    pub subject: String,

    /// Raw payload bytes.
    pub payload: Vec<u8>,

    /// Headers published with the message.
    pub headers: Headers,

    /// Delivery metadata.
    pub meta: DeliveryMeta,
}

impl Delivery {
    /// Deserializes the JSON payload.
    pub fn json<T: DeserializeOwned>(&self) -> JobResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// The last subject token, which is the job name for queue subjects.
    pub fn job_name(&self) -> &str {
        self.subject
            .rsplit_once('.')
            .map_or(self.subject.as_str(), |(_, name)| name)
    }

    /// True when this is not the first delivery of the message.
    pub fn is_redelivery(&self) -> bool {
        self.meta.delivery_count > 1
    }
}

/// Serialized form of a typed job, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEnvelope {
    /// Job name.
    pub name: &'static str,

    /// JSON payload.
    pub payload: Vec<u8>,

    /// Publish options derived from the job.
    pub options: AddOptions,
}

impl JobEnvelope {
    /// Serializes `job` and collects its idempotency key and headers.
    pub fn new<J: Job>(job: &J) -> JobResult<Self> {
        Ok(Self {
            name: J::NAME,
            payload: serde_json::to_vec(job)?,
            options: AddOptions {
                id: job.idempotency_key(),
                headers: job.headers(),
            },
        })
    }
}
