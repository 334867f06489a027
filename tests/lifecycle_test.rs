//! End-to-end task lifecycle over the in-memory collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use taskrelay::engine::{
    DeliveryOutcome, RecoveryRequest, RecoverySweeper, TaskService, Worker, WorkerConfig,
};
use taskrelay::executor::{ExecutorRegistry, ExecutorSettings};
use taskrelay::lock::{DistributedLock, InMemoryLock};
use taskrelay::model::history::is_chain;
use taskrelay::model::{NewTask, Priority, Status, Task, TaskId};
use taskrelay::payload::{Params, encode_params, wrap_raw};
use taskrelay::queue::{ChannelNames, DispatchQueue, InMemoryQueue};
use taskrelay::retry::RetryPolicy;
use taskrelay::store::{InMemoryTaskStore, TaskStore};

struct Harness {
    store: Arc<InMemoryTaskStore>,
    queue: Arc<InMemoryQueue>,
    lock: Arc<InMemoryLock>,
    channels: ChannelNames,
    /// Value the `run_query` executor draws next.
    draw: Arc<AtomicU32>,
    /// How many times `run_query` drew.
    draws: Arc<AtomicU32>,
    worker: Worker,
    service: TaskService,
    sweeper: RecoverySweeper,
}

impl Harness {
    fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Self {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let lock = Arc::new(InMemoryLock::new());
        let channels = ChannelNames::default();
        let draw = Arc::new(AtomicU32::new(100));
        let draws = Arc::new(AtomicU32::new(0));

        let random = {
            let draw = draw.clone();
            let draws = draws.clone();
            Arc::new(move || {
                draws.fetch_add(1, Ordering::SeqCst);
                draw.load(Ordering::SeqCst)
            })
        };
        let registry = ExecutorRegistry::with_defaults(ExecutorSettings { delay, random });

        let worker = Worker::new(
            store.clone(),
            queue.clone(),
            lock.clone(),
            Arc::new(registry),
            WorkerConfig {
                retry: RetryPolicy::immediate(3),
                poll_interval: Duration::from_millis(10),
                ..WorkerConfig::default()
            },
        );
        let service = TaskService::new(store.clone(), queue.clone(), channels.clone());
        let sweeper = RecoverySweeper::new(store.clone(), queue.clone(), channels.clone());

        Self {
            store,
            queue,
            lock,
            channels,
            draw,
            draws,
            worker,
            service,
            sweeper,
        }
    }

    async fn submit(&self, task_type: &str, payload: String, priority: Priority) -> Task {
        self.service
            .submit(NewTask::new("test", task_type, payload).priority(priority))
            .await
            .unwrap()
    }

    /// Take the next message off a priority channel, like a consumer would.
    async fn take(&self, priority: Priority) -> String {
        self.queue
            .receive(self.channels.for_priority(priority), "test:1")
            .await
            .unwrap()
            .expect("a message on the channel")
    }

    async fn transitions(&self, id: TaskId) -> Vec<(Status, Status)> {
        self.store
            .history(id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| (c.old_status, c.new_status))
            .collect()
    }

    async fn status(&self, id: TaskId) -> Status {
        self.service.status(id).await.unwrap()
    }
}

fn email_payload() -> String {
    let mut params = Params::new();
    params.insert("to".to_string(), "ops@example.com".to_string());
    encode_params(&params).unwrap()
}

fn query_payload() -> String {
    let mut params = Params::new();
    params.insert("query".to_string(), "SELECT 1".to_string());
    encode_params(&params).unwrap()
}

#[tokio::test]
async fn submit_publishes_snapshot_to_priority_channel() {
    let h = Harness::new();
    let task = h.submit("send_email", email_payload(), Priority::High).await;

    assert_eq!(task.status, Status::Queued);
    assert_eq!(h.queue.len("jobs_high"), 1);
    assert!(h.queue.is_empty("jobs_normal"));

    let body = h.take(Priority::High).await;
    let snapshot = Task::from_message(&body).unwrap();
    assert_eq!(snapshot.id, task.id);
    assert_eq!(snapshot.payload, email_payload());
}

#[tokio::test]
async fn send_email_succeeds() {
    let h = Harness::new();
    let task = h.submit("send_email", email_payload(), Priority::Normal).await;

    let outcome = h.worker.handle_delivery(&h.take(Priority::Normal).await).await;

    assert_eq!(outcome, DeliveryOutcome::Succeeded);
    assert_eq!(h.status(task.id).await, Status::Succeeded);
    assert_eq!(
        h.transitions(task.id).await,
        vec![
            (Status::Queued, Status::Running),
            (Status::Running, Status::Succeeded)
        ]
    );
    assert!(!h.lock.is_held(&task.lock_key()));
}

#[tokio::test]
async fn run_query_above_threshold_succeeds() {
    let h = Harness::new();
    h.draw.store(21, Ordering::SeqCst);
    let task = h.submit("run_query", query_payload(), Priority::Low).await;

    let outcome = h.worker.handle_delivery(&h.take(Priority::Low).await).await;

    assert_eq!(outcome, DeliveryOutcome::Succeeded);
    assert_eq!(
        h.transitions(task.id).await,
        vec![
            (Status::Queued, Status::Running),
            (Status::Running, Status::Succeeded)
        ]
    );
    assert_eq!(h.draws.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn run_query_at_threshold_fails_after_retries() {
    let h = Harness::new();
    h.draw.store(20, Ordering::SeqCst);
    let task = h.submit("run_query", query_payload(), Priority::Normal).await;

    let outcome = h.worker.handle_delivery(&h.take(Priority::Normal).await).await;

    assert_eq!(outcome, DeliveryOutcome::Failed);
    assert_eq!(h.status(task.id).await, Status::Failed);
    assert_eq!(
        h.transitions(task.id).await,
        vec![
            (Status::Queued, Status::Running),
            (Status::Running, Status::Failed)
        ]
    );
    // Every retry re-runs the executor.
    assert_eq!(h.draws.load(Ordering::SeqCst), 3);
    assert!(!h.lock.is_held(&task.lock_key()));
}

#[tokio::test]
async fn unknown_type_fails_without_running() {
    let h = Harness::new();
    let task = h.submit("resize_image", email_payload(), Priority::Normal).await;

    let outcome = h.worker.handle_delivery(&h.take(Priority::Normal).await).await;

    assert_eq!(outcome, DeliveryOutcome::Failed);
    assert_eq!(
        h.transitions(task.id).await,
        vec![(Status::Queued, Status::Failed)]
    );
}

#[tokio::test]
async fn malformed_payload_fails_without_running() {
    let h = Harness::new();
    // Single layer: an object where a string literal is expected.
    let single = h
        .submit("send_email", r#"{"to":"a@b.c"}"#.to_string(), Priority::Normal)
        .await;
    // Two layers, but the inner text is not a string map.
    let nested = h
        .submit("send_email", wrap_raw(r#"{"to":1}"#).unwrap(), Priority::Normal)
        .await;

    for task in [&single, &nested] {
        let outcome = h.worker.handle_delivery(&h.take(Priority::Normal).await).await;
        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_eq!(
            h.transitions(task.id).await,
            vec![(Status::Queued, Status::Failed)]
        );
    }
}

#[tokio::test]
async fn held_lock_leaves_task_untouched() {
    let h = Harness::new();
    let task = h.submit("send_email", email_payload(), Priority::Normal).await;
    assert!(
        h.lock
            .try_lock(&task.lock_key(), Duration::from_secs(10))
            .await
            .unwrap()
            .is_some()
    );

    let outcome = h.worker.handle_delivery(&h.take(Priority::Normal).await).await;

    assert_eq!(outcome, DeliveryOutcome::Contended);
    assert_eq!(h.status(task.id).await, Status::Queued);
    assert!(h.store.history(task.id).await.is_err());
}

#[tokio::test]
async fn concurrent_deliveries_run_the_task_once() {
    let h = Harness::with_delay(Duration::from_millis(50));
    let task = h.submit("send_email", email_payload(), Priority::Normal).await;
    let body = h.take(Priority::Normal).await;

    let (a, b) = tokio::join!(
        h.worker.handle_delivery(&body),
        h.worker.handle_delivery(&body)
    );

    let mut outcomes = [a, b];
    outcomes.sort_by_key(|o| o.as_str());
    assert_eq!(
        outcomes,
        [DeliveryOutcome::Contended, DeliveryOutcome::Succeeded]
    );
    let running = h
        .transitions(task.id)
        .await
        .into_iter()
        .filter(|(_, to)| *to == Status::Running)
        .count();
    assert_eq!(running, 1);
}

#[tokio::test]
async fn stale_duplicate_after_success_is_abandoned() {
    let h = Harness::new();
    let task = h.submit("send_email", email_payload(), Priority::Normal).await;
    let body = h.take(Priority::Normal).await;

    assert_eq!(h.worker.handle_delivery(&body).await, DeliveryOutcome::Succeeded);
    // Same Queued snapshot delivered again.
    assert_eq!(h.worker.handle_delivery(&body).await, DeliveryOutcome::Abandoned);

    assert_eq!(h.status(task.id).await, Status::Succeeded);
    assert_eq!(h.transitions(task.id).await.len(), 2);
}

#[tokio::test]
async fn lost_delivery_is_revived_by_recovery() {
    let h = Harness::new();
    let task = h.submit("send_email", email_payload(), Priority::Normal).await;

    // A consumer takes the message and dies before doing anything with it.
    let _lost = h.take(Priority::Normal).await;
    assert!(h.queue.is_empty("jobs_normal"));
    assert_eq!(h.status(task.id).await, Status::Queued);

    h.store.backdate(task.id, 120).unwrap();
    let report = h
        .sweeper
        .recover(RecoveryRequest {
            status: Status::Queued,
            stale_after_secs: 60,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);

    let outcome = h.worker.handle_delivery(&h.take(Priority::Normal).await).await;
    assert_eq!(outcome, DeliveryOutcome::Succeeded);
    assert_eq!(h.status(task.id).await, Status::Succeeded);
}

#[tokio::test]
async fn failed_task_is_reprocessed_after_recovery() {
    let h = Harness::new();
    h.draw.store(5, Ordering::SeqCst);
    let task = h.submit("run_query", query_payload(), Priority::High).await;
    let outcome = h.worker.handle_delivery(&h.take(Priority::High).await).await;
    assert_eq!(outcome, DeliveryOutcome::Failed);

    h.draw.store(80, Ordering::SeqCst);
    let report = h
        .sweeper
        .recover(RecoveryRequest {
            status: Status::Failed,
            stale_after_secs: 0,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);

    let outcome = h.worker.handle_delivery(&h.take(Priority::High).await).await;
    assert_eq!(outcome, DeliveryOutcome::Succeeded);

    let history = h.store.history(task.id).await.unwrap();
    assert!(is_chain(Status::Queued, &history));
    assert_eq!(
        h.transitions(task.id).await,
        vec![
            (Status::Queued, Status::Running),
            (Status::Running, Status::Failed),
            (Status::Failed, Status::Running),
            (Status::Running, Status::Succeeded),
        ]
    );
}

#[tokio::test]
async fn failed_publish_still_accepts_task() {
    let h = Harness::new();
    h.queue.set_fail_publish(true);
    let task = h.submit("send_email", email_payload(), Priority::Low).await;

    assert_eq!(h.status(task.id).await, Status::Queued);
    assert!(h.queue.is_empty("jobs_low"));

    h.queue.set_fail_publish(false);
    let report = h
        .sweeper
        .recover(RecoveryRequest {
            status: Status::Queued,
            stale_after_secs: 0,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(h.queue.len("jobs_low"), 1);
}

#[tokio::test]
async fn worker_loop_drains_channel_until_shutdown() {
    let h = Harness::new();
    let first = h.submit("send_email", email_payload(), Priority::Normal).await;
    let second = h.submit("run_query", query_payload(), Priority::Normal).await;

    let handle = {
        let worker = h.worker.clone();
        tokio::spawn(async move { worker.run("jobs_normal", "loop:1").await })
    };

    for _ in 0..200 {
        if h.status(first.id).await.is_terminal() && h.status(second.id).await.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.worker.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(h.status(first.id).await, Status::Succeeded);
    assert_eq!(h.status(second.id).await, Status::Succeeded);
    assert!(h.queue.is_empty("jobs_normal"));
}
