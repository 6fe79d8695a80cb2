//! Queue errors.

use thiserror::Error;

use crate::job::JobState;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A job with this id already exists. Enqueue rejects rather than
    /// overwriting so attempt history is never silently lost.
    #[error("Job already exists: {0}")]
    DuplicateId(String),

    /// The caller's lease no longer matches the stored one; the job has
    /// been reclaimed and belongs to someone else now.
    #[error("Lease no longer held for job {0}")]
    LeaseMismatch(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// DLQ operation on a job that is not dead.
    #[error("Job {id} is not in the dead letter queue (state: {state})")]
    NotInDlq { id: String, state: JobState },

    /// Malformed enqueue payload.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Unknown config key or unparseable value.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<tokio_rusqlite::Error> for QueueError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        QueueError::Database(err.to_string())
    }
}
