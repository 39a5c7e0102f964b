//! Error types for loglens-core

use crate::types::JobStatus;
use thiserror::Error;

/// Main error type for the loglens-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error for stored summaries
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Log record not found
    #[error("log not found: {0}")]
    LogNotFound(String),

    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Transition not permitted by the job state machine
    #[error("job {job_id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Another transition won the conditional update
    #[error("job {0}: concurrent transition detected")]
    TransitionConflict(String),

    /// The log record has no resolvable content
    #[error("log {0} has no resolvable storage key")]
    MissingSource(String),

    /// Blob not present in the blob store
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Storage key that cannot be mapped into the blob store
    #[error("invalid storage key: {0}")]
    InvalidStorageKey(String),

    /// Batch write request exceeding the per-request item limit
    #[error("batch of {len} items exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },

    /// Malformed event query
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Work queue error
    #[error("queue error: {0}")]
    Queue(String),
}

/// Result type alias for loglens-core
pub type Result<T> = std::result::Result<T, Error>;
