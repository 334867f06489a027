//! Recovery sweep: republish tasks that have sat in `Queued` or `Failed`
//! longer than a threshold.
//!
//! The sweep never writes to the store. It only puts a fresh copy of each
//! stale task's snapshot back on its priority channel and lets the next
//! worker pass move it forward. Running a sweep twice with no worker activity
//! leaves every stored status untouched.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{Status, Task};
use crate::queue::{ChannelNames, DispatchQueue};
use crate::store::TaskStore;
use crate::telemetry::metrics;

/// Which tasks to sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryRequest {
    /// `Queued` or `Failed`.
    pub status: Status,
    /// Only tasks last updated at least this many seconds ago.
    pub stale_after_secs: i64,
    /// Maximum number of tasks to republish in one sweep.
    pub limit: i64,
}

/// Summary of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Stale tasks selected from the store.
    pub candidates: usize,
    /// Tasks successfully republished.
    pub requeued: usize,
    /// Tasks that could not be serialized or published.
    pub skipped: usize,
}

pub struct RecoverySweeper {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DispatchQueue>,
    channels: ChannelNames,
}

impl RecoverySweeper {
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

    /// Run one sweep.
    ///
    /// Fails only on an invalid request or when the store cannot be queried.
    /// Per-task failures are logged and counted as skipped.
    pub async fn recover(&self, request: RecoveryRequest) -> Result<RecoveryReport> {
        if !request.status.is_processable() {
            return Err(Error::InvalidRecoveryStatus(request.status));
        }
        if request.limit < 0 {
            return Err(Error::InvalidRecoveryLimit(request.limit));
        }

        let stale = match self
            .store
            .get_stale(request.status, request.stale_after_secs, request.limit)
            .await
        {
            Ok(tasks) => tasks,
            Err(Error::NotFound(_)) => {
                debug!(status = %request.status, "no stale tasks");
                return Ok(RecoveryReport::default());
            }
            Err(e) => return Err(e),
        };

        let mut report = RecoveryReport {
            candidates: stale.len(),
            ..RecoveryReport::default()
        };
        for task in &stale {
            if self.republish(task).await {
                report.requeued += 1;
            } else {
                report.skipped += 1;
            }
        }

        if report.requeued > 0 {
            metrics::recovery_requeued().add(
                report.requeued as u64,
                &[KeyValue::new("status", request.status.as_str())],
            );
        }
        info!(
            status = %request.status,
            stale_after_secs = request.stale_after_secs,
            candidates = report.candidates,
            requeued = report.requeued,
            skipped = report.skipped,
            "recovery sweep finished"
        );
        Ok(report)
    }

    async fn republish(&self, task: &Task) -> bool {
        let body = match task.to_message() {
            Ok(body) => body,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "failed to serialize stale task");
                return false;
            }
        };
        let channel = self.channels.for_priority(task.priority);
        match self.queue.publish(channel, &body).await {
            Ok(()) => {
                debug!(task_id = %task.id, status = %task.status, channel, "task requeued");
                true
            }
            Err(e) => {
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    priority = %task.priority,
                    channel,
                    error = %e,
                    "failed to republish stale task"
                );
                false
            }
        }
    }
}
