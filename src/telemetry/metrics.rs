//! Metric instrument factories for taskrelay.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"taskrelay"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for taskrelay instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("taskrelay")
}

/// Counter: tasks accepted by the store.
/// Labels: `task_type`, `priority`.
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.tasks.submitted")
        .with_description("Number of tasks submitted")
        .build()
}

/// Counter: committed task status transitions.
/// Labels: `from`, `to`.
pub fn task_status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.tasks.status_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: dispatch queue operations (create, send, pop).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.queue.operations")
        .with_description("Number of dispatch queue operations")
        .build()
}

/// Counter: execution lock attempts.
/// Labels: `result` ("acquired" | "contended" | "error").
pub fn lock_acquisitions() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.lock.acquisitions")
        .with_description("Number of execution lock attempts")
        .build()
}

/// Counter: individual executor attempts, including retries.
/// Labels: `task_type`, `result` ("ok" | "error").
pub fn executor_attempts() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.executor.attempts")
        .with_description("Number of executor attempts")
        .build()
}

/// Counter: tasks republished by the recovery sweep.
/// Labels: `status`.
pub fn recovery_requeued() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.recovery.requeued")
        .with_description("Number of tasks republished by recovery")
        .build()
}

/// Histogram: wall time from lock acquisition to final status, in milliseconds.
/// Labels: `task_type`, `outcome`.
pub fn task_execution_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskrelay.task.execution_ms")
        .with_description("Task execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
