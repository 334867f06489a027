//! pgmq-backed dispatch queue.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ChannelNames, DispatchQueue};
use crate::db::Db;
use crate::error::{Error, Result};

/// Dispatch queue client over pgmq.
///
/// Remembers which channels it has already declared so each one is created
/// at most once for the lifetime of the client.
pub struct PgmqQueue {
    db: Db,
    declared: Mutex<HashSet<String>>,
}

impl PgmqQueue {
    /// Build a client and declare the three main channels up front.
    pub async fn connect(db: Db, channels: &ChannelNames) -> Result<Self> {
        let queue = Self {
            db,
            declared: Mutex::new(HashSet::new()),
        };
        for channel in channels.all() {
            queue.ensure_declared(channel).await?;
        }
        info!(
            high = %channels.high,
            normal = %channels.normal,
            low = %channels.low,
            "dispatch channels declared"
        );
        Ok(queue)
    }

    async fn ensure_declared(&self, channel: &str) -> Result<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(channel) {
            return Ok(());
        }
        self.db.create_queue(channel).await.map_err(queue_error)?;
        declared.insert(channel.to_string());
        debug!(channel, "channel declared");
        Ok(())
    }

    /// Channels this client has declared so far.
    pub async fn declared_channels(&self) -> Vec<String> {
        let mut names: Vec<_> = self.declared.lock().await.iter().cloned().collect();
        names.sort();
        names
    }
}

fn queue_error(e: Error) -> Error {
    match e {
        Error::Persistence(inner) => Error::Queue(inner.to_string()),
        other => other,
    }
}

#[async_trait]
impl DispatchQueue for PgmqQueue {
    async fn publish(&self, channel: &str, body: &str) -> Result<()> {
        self.ensure_declared(channel).await?;
        let msg_id = self
            .db
            .send_to_queue(channel, body)
            .await
            .map_err(queue_error)?;
        debug!(channel, msg_id, "message published");
        Ok(())
    }

    async fn receive(&self, channel: &str, consumer: &str) -> Result<Option<String>> {
        let msg = self.db.pop_from_queue(channel).await.map_err(queue_error)?;
        Ok(msg.map(|m| {
            debug!(channel, consumer, msg_id = m.msg_id, read_ct = m.read_ct, "message delivered");
            m.body
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.db.health_check().await.map_err(queue_error)
    }
}
