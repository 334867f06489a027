//! Worker loop: consume a delivery, take the task's lock, run its executor
//! under the retry policy, and drive the status machine.
//!
//! ```text
//!   Queued|Failed ──lock──▶ decode payload ──▶ resolve executor ──▶ Running
//!        │                      │                    │                 │
//!        │                      └──── bad ───────────┴──▶ Failed       │
//!        │                                                     ┌───────┴───────┐
//!   contended/lock error: no change                        Succeeded      Failed
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::executor::{Executor, ExecutorRegistry};
use crate::lock::{DistributedLock, with_task_lock};
use crate::model::{Status, Task};
use crate::payload::{Params, decode_params};
use crate::queue::DispatchQueue;
use crate::retry::{RetryPolicy, retry};
use crate::store::TaskStore;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_status_transition, record_task, start_task_span};

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Lifetime of the per-task execution lock.
    pub lock_ttl: Duration,
    /// Policy applied around each executor invocation.
    pub retry: RetryPolicy,
    /// Sleep between receives when a channel is empty.
    pub poll_interval: Duration,
    /// Bound on a whole `run` invocation, checked between deliveries.
    /// `None` runs until shutdown.
    pub run_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(500),
            run_timeout: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_ttl: config.lock_ttl,
            retry: config.retry.clone(),
            poll_interval: config.poll_interval,
            run_timeout: config.worker_timeout,
        }
    }
}

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Undecodable body, or a snapshot in a status workers do not pick up.
    Dropped,
    /// Another worker holds the task's lock.
    Contended,
    /// A collaborator failed, or the task moved underneath us. No further
    /// status change was written.
    Abandoned,
    Succeeded,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Dropped => "dropped",
            DeliveryOutcome::Contended => "contended",
            DeliveryOutcome::Abandoned => "abandoned",
            DeliveryOutcome::Succeeded => "succeeded",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

/// One consumer of the dispatch queue. Cheap to clone; clones share the
/// collaborators and the shutdown signal.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DispatchQueue>,
    lock: Arc<dyn DistributedLock>,
    registry: Arc<ExecutorRegistry>,
    config: WorkerConfig,
    stopping: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn DispatchQueue>,
        lock: Arc<dyn DistributedLock>,
        registry: Arc<ExecutorRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            lock,
            registry,
            config,
            stopping: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal every loop sharing this worker to stop. In-flight processing is
    /// not drained.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Consume `channel` as `consumer` until shutdown or the run timeout.
    ///
    /// The timeout is only checked between deliveries, so a delivery that is
    /// already being processed always runs to completion and releases its
    /// lock.
    pub async fn run(&self, channel: &str, consumer: &str) -> crate::error::Result<()> {
        info!(channel, consumer, "worker started");
        let deadline = self
            .config
            .run_timeout
            .map(|limit| tokio::time::Instant::now() + limit);

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                info!(channel, consumer, "worker shutting down");
                return Ok(());
            }
            let idle = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(tokio::time::Instant::now());
                    if left.is_zero() {
                        info!(channel, consumer, "worker run timeout reached");
                        return Ok(());
                    }
                    left.min(self.config.poll_interval)
                }
                None => self.config.poll_interval,
            };

            match self.queue.receive(channel, consumer).await {
                Ok(Some(body)) => {
                    let span = start_task_span(channel, consumer);
                    let outcome = self.handle_delivery(&body).instrument(span).await;
                    debug!(channel, consumer, outcome = outcome.as_str(), "delivery handled");
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(channel, consumer, error = %e, "receive failed"),
            }

            tokio::select! {
                _ = self.shutdown.notified() => {}
                _ = tokio::time::sleep(idle) => {}
            }
        }
    }

    /// Process one message body end to end.
    ///
    /// Identity and status are recorded on the current span, so callers that
    /// want a per-delivery span should instrument this future with one from
    /// [`start_task_span`].
    pub async fn handle_delivery(&self, body: &str) -> DeliveryOutcome {
        let task = match Task::from_message(body) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "undecodable message dropped");
                return DeliveryOutcome::Dropped;
            }
        };
        let span = Span::current();
        record_task(&span, task.id, &task.task_type);

        if !task.status.is_processable() {
            info!(
                task_id = %task.id,
                status = %task.status,
                "snapshot not in a processable status, dropped"
            );
            return DeliveryOutcome::Dropped;
        }

        let locked = with_task_lock(self.lock.as_ref(), task.id, self.config.lock_ttl, || {
            self.process(&task, &span)
        })
        .await;

        match locked {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                debug!(task_id = %task.id, "lock held elsewhere, skipping");
                DeliveryOutcome::Contended
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "lock unavailable, abandoning delivery");
                DeliveryOutcome::Abandoned
            }
        }
    }

    /// Everything that happens while the lock is held.
    async fn process(&self, task: &Task, span: &Span) -> DeliveryOutcome {
        let from = task.status;

        let params = match decode_params(&task.payload) {
            Ok(params) => params,
            Err(e) => {
                warn!(task_id = %task.id, task_type = %task.task_type, error = %e, "payload rejected");
                return self.finish(task, span, from, Status::Failed).await;
            }
        };

        let executor = match self.registry.build(&task.task_type) {
            Ok(executor) => executor,
            Err(e) => {
                warn!(task_id = %task.id, task_type = %task.task_type, error = %e, "no executor");
                return self.finish(task, span, from, Status::Failed).await;
            }
        };

        if !self.transition(task, span, from, Status::Running).await {
            return DeliveryOutcome::Abandoned;
        }

        let started = Instant::now();
        let result = self.execute(task, executor.as_ref(), &params).await;
        let to = match result {
            Ok(()) => Status::Succeeded,
            Err(ref e) => {
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    priority = %task.priority,
                    error = %e,
                    "retries exhausted"
                );
                Status::Failed
            }
        };
        let outcome = self.finish(task, span, Status::Running, to).await;

        metrics::task_execution_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("task_type", task.task_type.clone()),
                KeyValue::new("outcome", outcome.as_str()),
            ],
        );
        outcome
    }

    async fn execute(
        &self,
        task: &Task,
        executor: &dyn Executor,
        params: &Params,
    ) -> crate::error::Result<()> {
        retry(&self.config.retry, |attempt| async move {
            let result = executor.execute(params).await;
            let label = if result.is_ok() { "ok" } else { "error" };
            metrics::executor_attempts().add(
                1,
                &[
                    KeyValue::new("task_type", task.task_type.clone()),
                    KeyValue::new("result", label),
                ],
            );
            debug!(task_id = %task.id, attempt, result = label, "executor attempt");
            result
        })
        .await
    }

    /// Write the final transition and map it to an outcome.
    async fn finish(&self, task: &Task, span: &Span, from: Status, to: Status) -> DeliveryOutcome {
        if !self.transition(task, span, from, to).await {
            return DeliveryOutcome::Abandoned;
        }
        match to {
            Status::Succeeded => {
                info!(task_id = %task.id, task_type = %task.task_type, "task succeeded");
                DeliveryOutcome::Succeeded
            }
            _ => DeliveryOutcome::Failed,
        }
    }

    /// Apply a conditional transition. Returns false (after logging) if it
    /// was not written.
    async fn transition(&self, task: &Task, span: &Span, from: Status, to: Status) -> bool {
        match self.store.transition_status(task.id, from, to).await {
            Ok(_) => {
                record_status_transition(span, from, to);
                true
            }
            Err(e @ Error::Conflict { .. }) => {
                warn!(task_id = %task.id, from = %from, to = %to, error = %e, "task moved underneath worker");
                false
            }
            Err(e) => {
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    priority = %task.priority,
                    from = %from,
                    to = %to,
                    error = %e,
                    "status transition failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorSettings;
    use crate::lock::InMemoryLock;
    use crate::model::NewTask;
    use crate::payload::encode_params;
    use crate::queue::InMemoryQueue;
    use crate::store::InMemoryTaskStore;

    fn worker(store: Arc<InMemoryTaskStore>) -> Worker {
        let registry = ExecutorRegistry::with_defaults(ExecutorSettings {
            delay: Duration::ZERO,
            random: Arc::new(|| 99),
        });
        Worker::new(
            store,
            Arc::new(InMemoryQueue::new()),
            Arc::new(InMemoryLock::new()),
            Arc::new(registry),
            WorkerConfig {
                retry: RetryPolicy::immediate(2),
                poll_interval: Duration::from_millis(10),
                ..WorkerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn garbage_body_is_dropped() {
        let worker = worker(Arc::new(InMemoryTaskStore::new()));
        assert_eq!(worker.handle_delivery("not json").await, DeliveryOutcome::Dropped);
    }

    #[tokio::test]
    async fn running_snapshot_is_dropped_without_transition() {
        let store = Arc::new(InMemoryTaskStore::new());
        let payload = encode_params(&Params::new()).unwrap();
        let task = store
            .create(NewTask::new("mail", "send_email", payload))
            .await
            .unwrap();
        let mut snapshot = task.clone();
        snapshot.status = Status::Running;

        let worker = worker(store.clone());
        let outcome = worker.handle_delivery(&snapshot.to_message().unwrap()).await;
        assert_eq!(outcome, DeliveryOutcome::Dropped);
        assert_eq!(store.get_by_id(task.id).await.unwrap().status, Status::Queued);
    }

    #[tokio::test]
    async fn shutdown_stops_run() {
        let worker = worker(Arc::new(InMemoryTaskStore::new()));
        let handle = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run("jobs_normal", "c:1").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        worker.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_timeout_bounds_the_loop() {
        let mut worker = worker(Arc::new(InMemoryTaskStore::new()));
        worker.config.run_timeout = Some(Duration::from_millis(50));
        worker.run("jobs_low", "c:1").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_timeout_lets_in_flight_task_finish() {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let lock = Arc::new(InMemoryLock::new());
        let registry = ExecutorRegistry::with_defaults(ExecutorSettings {
            delay: Duration::from_millis(500),
            random: Arc::new(|| 99),
        });
        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            lock.clone(),
            Arc::new(registry),
            WorkerConfig {
                retry: RetryPolicy::immediate(1),
                poll_interval: Duration::from_millis(10),
                run_timeout: Some(Duration::from_millis(100)),
                ..WorkerConfig::default()
            },
        );

        let payload = encode_params(&Params::new()).unwrap();
        let task = store
            .create(NewTask::new("mail", "send_email", payload))
            .await
            .unwrap();
        queue
            .publish("jobs_normal", &task.to_message().unwrap())
            .await
            .unwrap();

        worker.run("jobs_normal", "c:1").await.unwrap();

        assert_eq!(store.get_by_id(task.id).await.unwrap().status, Status::Succeeded);
        assert!(!lock.is_held(&task.lock_key()));
    }
}
