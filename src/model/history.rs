//! Status change history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Status, TaskId};

/// One immutable record of a status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    #[serde(skip_serializing)]
    #[serde(default)]
    pub id: i64,
    pub task_id: TaskId,
    pub old_status: Status,
    pub new_status: Status,
    #[serde(rename = "created_at_stamp", with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// Check that `entries` form an unbroken chain starting at `initial`.
///
/// Each entry's old status must equal the previous entry's new status.
pub fn is_chain(initial: Status, entries: &[StatusChange]) -> bool {
    let mut expected = initial;
    for entry in entries {
        if entry.old_status != expected {
            return false;
        }
        expected = entry.new_status;
    }
    true
}
