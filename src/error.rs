//! Error types for taskrelay.

use thiserror::Error;

use crate::model::{Status, TaskId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// The stored status no longer matches the status the caller observed.
    #[error("status conflict on task {id}: expected {expected}, found {actual}")]
    Conflict {
        id: TaskId,
        expected: Status,
        actual: Status,
    },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("only queued and failed tasks can be recovered, got {0}")]
    InvalidRecoveryStatus(Status),

    #[error("recovery limit must not be negative, got {0}")]
    InvalidRecoveryLimit(i64),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Lock(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
