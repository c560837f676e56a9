//! Job error types.

use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// `start()` was called before `setup()` completed.
    #[error("Worker is not set up: call setup() before start()")]
    NotSetUp,

    /// Operation not allowed in the current lifecycle state.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A log or cursor already exists and the caller asked for creation only.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    /// The named log does not exist.
    #[error("Log not found: {0}")]
    LogNotFound(String),

    /// The named durable cursor does not exist.
    #[error("Cursor not found: {log}/{cursor}")]
    CursorNotFound { log: String, cursor: String },

    /// Published to a subject none of the log's patterns bind.
    #[error("Subject {subject} is not bound to log {log}")]
    SubjectNotBound { log: String, subject: String },

    /// A log, cursor, or job name that cannot be used in a subject.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// The job handle was already finalized or is unknown to the cursor.
    #[error("Job {sequence} is not pending on {cursor}")]
    NotPending { cursor: String, sequence: u64 },

    /// The user processor reported a failure.
    #[error("Job processing failed: {0}")]
    Processor(String),

    /// The user processor panicked.
    #[error("Job processor panicked: {0}")]
    Panicked(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Malformed entry read back from the log.
    #[error("Malformed log entry {id}: {reason}")]
    MalformedEntry { id: String, reason: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Creates a processor failure from anything printable.
    pub fn processor(message: impl Into<String>) -> Self {
        JobError::Processor(message.into())
    }

    /// Returns true for failures of the log transport that a later poll may
    /// not see again.
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::Redis(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
            }
            JobError::Pool(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error only says the resource was already there.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, JobError::AlreadyExists { .. })
    }
}

impl From<tributary_core::TributaryError> for JobError {
    fn from(err: tributary_core::TributaryError) -> Self {
        match err {
            tributary_core::TributaryError::Configuration(msg)
            | tributary_core::TributaryError::Validation(msg) => JobError::Configuration(msg),
            other => JobError::Internal(other.to_string()),
        }
    }
}
