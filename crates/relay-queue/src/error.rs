//! Error types for queue operations.

use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors raised by the job queue.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// Database operation failed.
    #[error("queue database error: {0}")]
    Database(String),

    /// Job payload could not be encoded or decoded.
    #[error("queue serialization error: {0}")]
    Serialization(String),

    /// Job no longer exists, e.g. completed by another worker.
    #[error("queue job {0} not found")]
    JobNotFound(uuid::Uuid),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
