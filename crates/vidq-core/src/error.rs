//! Error types for vidq.

use thiserror::Error;

use crate::models::JobStatus;

/// Result type alias using vidq's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vidq operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The media asset a job operates on no longer exists
    #[error("Video {0} not found")]
    SubjectNotFound(String),

    /// Stored job type has no handler
    #[error("Unknown job type: {0}")]
    UnsupportedJobType(String),

    /// Job parameters failed validation
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// A job with the same caller-visible id already exists
    #[error("Duplicate job id: {0}")]
    DuplicateJob(String),

    /// Attempted a status change the job lifecycle does not allow
    #[error("Invalid job transition for row {row_id}: {from} -> {to}")]
    InvalidTransition {
        row_id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    /// The row is `processing` under a different owner
    #[error("Job row {row_id} is not held by worker {worker_id}")]
    NotOwner { row_id: i64, worker_id: String },

    /// External media tool failed
    #[error("Executor error: {0}")]
    Executor(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure is transient infrastructure trouble rather than a
    /// problem with the job itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
