//! Task store operations: insert, lookup, stale selection, and audited
//! status transitions.

use async_trait::async_trait;
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{TaskStore, validate_transition};
use crate::telemetry::metrics;

const TASK_COLUMNS: &str = "id, name, type, status, priority, payload, created_at, updated_at";

#[async_trait]
impl TaskStore for super::Db {
    async fn create(&self, new: NewTask) -> Result<Task> {
        let row: TaskRow = sqlx::query_as(&format!(
            "INSERT INTO tasks (name, type, status, priority, payload)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&new.name)
        .bind(&new.task_type)
        .bind(Status::Queued.as_str())
        .bind(new.priority.as_str())
        .bind(&new.payload)
        .fetch_one(self.pool())
        .await?;

        metrics::tasks_submitted().add(
            1,
            &[
                KeyValue::new("task_type", new.task_type),
                KeyValue::new("priority", new.priority.as_str()),
            ],
        );

        row.try_into_task()
    }

    async fn get_by_id(&self, id: TaskId) -> Result<Task> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("task {id}")))?
            .try_into_task()
    }

    async fn get_by_status(&self, status: Status, limit: Option<i64>) -> Result<Vec<Task>> {
        // LIMIT NULL means no limit in Postgres.
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = $1 ORDER BY id LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        collect_tasks(rows, || format!("tasks with status {status}"))
    }

    async fn get_stale(
        &self,
        status: Status,
        older_than_secs: i64,
        limit: i64,
    ) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status = $1 AND updated_at <= now() - ($2 * interval '1 second')
             ORDER BY updated_at, id
             LIMIT $3"
        ))
        .bind(status.as_str())
        .bind(older_than_secs as f64)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        collect_tasks(rows, || format!("stale tasks with status {status}"))
    }

    async fn transition_status(&self, id: TaskId, expected: Status, new: Status) -> Result<Task> {
        validate_transition(expected, new)?;

        let mut tx = self.pool().begin().await?;

        let updated: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE tasks SET status = $1, updated_at = now()
             WHERE id = $2 AND status = $3
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(new.as_str())
        .bind(id.0)
        .bind(expected.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            let current = self.get_by_id(id).await?;
            return Err(Error::Conflict {
                id,
                expected,
                actual: current.status,
            });
        };

        sqlx::query(
            "INSERT INTO tasks_status_change_history (task_id, old_status, new_status)
             VALUES ($1, $2, $3)",
        )
        .bind(id.0)
        .bind(expected.as_str())
        .bind(new.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::task_status_transitions().add(
            1,
            &[
                KeyValue::new("from", expected.as_str()),
                KeyValue::new("to", new.as_str()),
            ],
        );

        updated.try_into_task()
    }

    async fn history(&self, id: TaskId) -> Result<Vec<StatusChange>> {
        let rows: Vec<StatusChangeRow> = sqlx::query_as(
            "SELECT id, task_id, old_status, new_status, created_at
             FROM tasks_status_change_history
             WHERE task_id = $1
             ORDER BY created_at, id",
        )
        .bind(id.0)
        .fetch_all(self.pool())
        .await?;

        if rows.is_empty() {
            return Err(Error::NotFound(format!("history for task {id}")));
        }
        rows.into_iter()
            .map(StatusChangeRow::try_into_status_change)
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        self.health_check().await
    }
}

fn collect_tasks(rows: Vec<TaskRow>, what: impl FnOnce() -> String) -> Result<Vec<Task>> {
    if rows.is_empty() {
        return Err(Error::NotFound(what()));
    }
    rows.into_iter().map(TaskRow::try_into_task).collect()
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    name: String,
    #[sqlx(rename = "type")]
    task_type: String,
    status: String,
    priority: String,
    payload: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        Ok(Task {
            id: TaskId(self.id),
            name: self.name,
            task_type: self.task_type,
            status: self.status.parse()?,
            priority: self.priority.parse()?,
            payload: self.payload,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatusChangeRow {
    id: i64,
    task_id: i64,
    old_status: String,
    new_status: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl StatusChangeRow {
    fn try_into_status_change(self) -> Result<StatusChange> {
        Ok(StatusChange {
            id: self.id,
            task_id: TaskId(self.task_id),
            old_status: self.old_status.parse()?,
            new_status: self.new_status.parse()?,
            created_at: self.created_at,
        })
    }
}
