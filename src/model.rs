//! Core data model.
//!
//! A task is a unit of submitted work. It has identity (assigned by the store),
//! a type tag selecting its executor, a priority selecting its dispatch channel,
//! an opaque payload, and a lifecycle status.

pub mod history;

pub use history::StatusChange;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A task record as persisted by the store.
///
/// The serialized form is also the dispatch message body: a full snapshot of
/// the task as of publish time. Timestamps travel as unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned identifier. Never reused.
    pub id: TaskId,

    /// Human-readable label supplied at submission.
    #[serde(default)]
    pub name: String,

    /// Executor tag (e.g. "send_email", "run_query").
    #[serde(rename = "type")]
    pub task_type: String,

    /// Current lifecycle status.
    pub status: Status,

    /// Routing attribute. Fixed at creation.
    pub priority: Priority,

    /// Doubly-encoded parameter envelope; see [`crate::payload`].
    pub payload: String,

    #[serde(rename = "created_at_stamp", with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updated_at_stamp", with = "chrono::serde::ts_seconds")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Serialize the task into a dispatch message body.
    pub fn to_message(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a dispatch message body back into a task snapshot.
    pub fn from_message(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Key under which the execution lock for this task is held.
    pub fn lock_key(&self) -> String {
        self.id.lock_key()
    }
}

/// Newtype for store-assigned task ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    pub fn lock_key(self) -> String {
        format!("lock:{}", self.0)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(TaskId)
            .map_err(|_| Error::Other(format!("invalid task id: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Submitted and waiting for a worker.
    Queued,
    /// A worker holds the lock and is executing.
    Running,
    /// Execution or decoding failed. Eligible for reprocessing.
    Failed,
    /// Done. Terminal.
    Succeeded,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Queued,
        Status::Running,
        Status::Failed,
        Status::Succeeded,
    ];

    /// Can a worker pick up a snapshot carrying this status?
    pub fn is_processable(self) -> bool {
        matches!(self, Status::Queued | Status::Failed)
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded)
    }

    /// Can a task move from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Queued, Running)
                | (Failed, Running)
                | (Queued, Failed)  // undecodable payload or unknown type
                | (Failed, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Running => "running",
            Status::Failed => "failed",
            Status::Succeeded => "succeeded",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Status::Queued),
            "running" => Ok(Status::Running),
            "failed" => Ok(Status::Failed),
            "succeeded" => Ok(Status::Succeeded),
            other => Err(Error::Other(format!("unknown status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Dispatch priority. Only used to pick the channel a task's messages travel on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(Error::Other(format!(
                "invalid priority '{other}', expected high, normal, or low"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Parameters for creating a task. The public API for submitting work.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) name: String,
    pub(crate) task_type: String,
    pub(crate) priority: Priority,
    pub(crate) payload: String,
}

impl NewTask {
    /// `payload` must already be the doubly-encoded envelope the worker expects.
    pub fn new(
        name: impl Into<String>,
        task_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            priority: Priority::Normal,
            payload: payload.into(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn get_priority(&self) -> Priority {
        self.priority
    }
}
