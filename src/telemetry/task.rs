//! Task execution span helpers.
//!
//! Provides span creation and status-transition recording for tasks
//! flowing through a worker.

use tracing::Span;

use crate::model::{Status, TaskId};

/// Start a span for one delivery handled by a worker.
///
/// `task.id` and `task.status` are declared empty: the id is only known once
/// the message decodes, and the status is updated via
/// [`record_status_transition`].
pub fn start_task_span(channel: &str, consumer: &str) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.channel" = channel,
        "task.consumer" = consumer,
        "task.id" = tracing::field::Empty,
        "task.type" = tracing::field::Empty,
        "task.status" = tracing::field::Empty,
    )
}

/// Fill in the task identity on a span opened by [`start_task_span`].
pub fn record_task(span: &Span, id: TaskId, task_type: &str) {
    span.record("task.id", id.0);
    span.record("task.type", task_type);
}

/// Record a status transition event on the given span.
pub fn record_status_transition(span: &Span, from: Status, to: Status) {
    span.record("task.status", to.as_str());
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "status_transition");
    });
}
