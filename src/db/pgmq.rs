//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.pop.
//! Message bodies are stored as JSON strings so they round-trip verbatim.

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// A message taken off a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub body: String,
}

fn record(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(self.pool())
            .await?;
        record(queue_name, "create");
        Ok(())
    }

    /// Send a message body to a pgmq queue. Returns the message ID.
    pub async fn send_to_queue(&self, queue_name: &str, body: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, 0)")
            .bind(queue_name)
            .bind(serde_json::Value::String(body.to_string()))
            .fetch_one(self.pool())
            .await?;
        record(queue_name, "send");
        Ok(row.0)
    }

    /// Take the next message off a queue, deleting it in the same statement.
    /// Returns None if the queue is empty.
    ///
    /// The message is gone from the broker once this returns, whatever the
    /// caller does with it afterwards.
    pub async fn pop_from_queue(&self, queue_name: &str) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.pop($1)")
        .bind(queue_name)
        .fetch_optional(self.pool())
        .await?;

        record(queue_name, if row.is_some() { "pop" } else { "pop_empty" });

        row.map(|(msg_id, read_ct, enqueued_at, message)| {
            let body = match message {
                serde_json::Value::String(s) => s,
                other => {
                    return Err(Error::Queue(format!(
                        "message {msg_id} on {queue_name} is not a string body: {other}"
                    )));
                }
            };
            Ok(PgmqMessage {
                msg_id,
                read_ct,
                enqueued_at,
                body,
            })
        })
        .transpose()
    }

    /// Number of messages currently waiting on a queue.
    pub async fn queue_length(&self, queue_name: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT queue_length FROM pgmq.metrics($1)")
            .bind(queue_name)
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }
}
