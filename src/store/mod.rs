//! Task store contract.
//!
//! The store is the source of truth for task status. It persists task records
//! and an append-only status change history, and applies status transitions
//! atomically together with their history entry.
//!
//! Implementations:
//! - [`crate::db::Db`]: Postgres via sqlx (production)
//! - [`InMemoryTaskStore`]: process-local, for tests and local runs

pub mod memory;

pub use memory::InMemoryTaskStore;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{NewTask, Status, StatusChange, Task, TaskId};

/// Reject transitions the state machine does not allow.
pub(crate) fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a task in status `Queued` and return the stored record.
    async fn create(&self, new: NewTask) -> Result<Task>;

    /// Fetch one task. `NotFound` if absent.
    async fn get_by_id(&self, id: TaskId) -> Result<Task>;

    /// Tasks currently in `status`. `NotFound` if none match.
    async fn get_by_status(&self, status: Status, limit: Option<i64>) -> Result<Vec<Task>>;

    /// Tasks in `status` whose last update is at or before now minus
    /// `older_than_secs`, oldest first. `NotFound` if none match.
    async fn get_stale(&self, status: Status, older_than_secs: i64, limit: i64)
    -> Result<Vec<Task>>;

    /// Move a task from `expected` to `new` and append the matching history
    /// entry, as one atomic unit.
    ///
    /// Nothing is written unless the stored status equals `expected`; a
    /// mismatch returns `Error::Conflict`.
    async fn transition_status(&self, id: TaskId, expected: Status, new: Status) -> Result<Task>;

    /// Status history of a task in insertion order. `NotFound` if empty.
    async fn history(&self, id: TaskId) -> Result<Vec<StatusChange>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;
}
