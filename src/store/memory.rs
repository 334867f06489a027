//! In-memory task store.
//!
//! Mirrors the Postgres store's semantics (id assignment, empty-set
//! `NotFound`, conditional transitions) behind a single mutex.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{TaskStore, validate_transition};
use crate::error::{Error, Result};
use crate::model::{NewTask, Status, StatusChange, Task, TaskId};

#[derive(Default)]
struct Inner {
    next_task_id: i64,
    next_change_id: i64,
    tasks: BTreeMap<TaskId, Task>,
    history: Vec<StatusChange>,
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Other("in-memory task store mutex poisoned".to_string()))
    }

    /// Shift a task's last-updated timestamp into the past, so it looks stale
    /// without waiting. No history entry is written.
    pub fn backdate(&self, id: TaskId, secs: i64) -> Result<()> {
        let mut inner = self.lock()?;
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        task.updated_at -= Duration::seconds(secs);
        Ok(())
    }
}

fn non_empty<T>(items: Vec<T>, what: String) -> Result<Vec<T>> {
    if items.is_empty() {
        Err(Error::NotFound(what))
    } else {
        Ok(items)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, new: NewTask) -> Result<Task> {
        let mut inner = self.lock()?;
        inner.next_task_id += 1;
        let now = Utc::now();
        let task = Task {
            id: TaskId(inner.next_task_id),
            name: new.name,
            task_type: new.task_type,
            status: Status::Queued,
            priority: new.priority,
            payload: new.payload,
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_by_id(&self, id: TaskId) -> Result<Task> {
        self.lock()?
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    async fn get_by_status(&self, status: Status, limit: Option<i64>) -> Result<Vec<Task>> {
        let inner = self.lock()?;
        let limit = limit.map_or(usize::MAX, |n| n.max(0) as usize);
        let tasks = inner
            .tasks
            .values()
            .filter(|t| t.status == status)
            .take(limit)
            .cloned()
            .collect();
        non_empty(tasks, format!("tasks with status {status}"))
    }

    async fn get_stale(
        &self,
        status: Status,
        older_than_secs: i64,
        limit: i64,
    ) -> Result<Vec<Task>> {
        let inner = self.lock()?;
        let cutoff = Utc::now() - Duration::seconds(older_than_secs);
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == status && t.updated_at <= cutoff)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.updated_at, t.id));
        tasks.truncate(limit.max(0) as usize);
        non_empty(tasks, format!("stale tasks with status {status}"))
    }

    async fn transition_status(&self, id: TaskId, expected: Status, new: Status) -> Result<Task> {
        validate_transition(expected, new)?;
        let mut inner = self.lock()?;
        let now = Utc::now();

        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        if task.status != expected {
            return Err(Error::Conflict {
                id,
                expected,
                actual: task.status,
            });
        }
        task.status = new;
        task.updated_at = now;
        let updated = task.clone();

        inner.next_change_id += 1;
        let change_id = inner.next_change_id;
        inner.history.push(StatusChange {
            id: change_id,
            task_id: id,
            old_status: expected,
            new_status: new,
            created_at: now,
        });

        Ok(updated)
    }

    async fn history(&self, id: TaskId) -> Result<Vec<StatusChange>> {
        let entries = self
            .lock()?
            .history
            .iter()
            .filter(|c| c.task_id == id)
            .cloned()
            .collect();
        non_empty(entries, format!("history for task {id}"))
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }
}
