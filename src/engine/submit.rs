//! Submission and query entry points.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::model::{NewTask, Status, StatusChange, Task, TaskId};
use crate::queue::{ChannelNames, DispatchQueue};
use crate::store::TaskStore;

/// Front door for producers and status queries.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DispatchQueue>,
    channels: ChannelNames,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn DispatchQueue>,
        channels: ChannelNames,
    ) -> Self {
        Self {
            store,
            queue,
            channels,
        }
    }

    /// Store a new task, then publish it to its priority channel.
    ///
    /// The publish is best-effort: once the record exists the task is
    /// accepted, and a failed publish is only logged. The recovery sweep
    /// picks such tasks up once they go stale.
    pub async fn submit(&self, new: NewTask) -> Result<Task> {
        let task = self.store.create(new).await?;
        let channel = self.channels.for_priority(task.priority);

        let published = match task.to_message() {
            Ok(body) => self.queue.publish(channel, &body).await,
            Err(e) => Err(e),
        };
        match published {
            Ok(()) => info!(
                task_id = %task.id,
                task_type = %task.task_type,
                priority = %task.priority,
                channel,
                "task submitted"
            ),
            Err(e) => warn!(
                task_id = %task.id,
                task_type = %task.task_type,
                priority = %task.priority,
                channel,
                error = %e,
                "task stored but not published; recovery will pick it up"
            ),
        }
        Ok(task)
    }

    /// Current status of a task. `NotFound` if absent.
    pub async fn status(&self, id: TaskId) -> Result<Status> {
        Ok(self.store.get_by_id(id).await?.status)
    }

    /// Full record of a task. `NotFound` if absent.
    pub async fn get(&self, id: TaskId) -> Result<Task> {
        self.store.get_by_id(id).await
    }

    /// Status history of a task. `NotFound` if it has none yet.
    pub async fn history(&self, id: TaskId) -> Result<Vec<StatusChange>> {
        self.store.history(id).await
    }
}
