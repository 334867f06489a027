//! Priority dispatch queue contract.
//!
//! Three independently named durable channels, one per [`Priority`]. Publish
//! is fire-and-forget: a failure is reported but never retried here, since the
//! task record already exists in the store and the recovery sweep will
//! republish it.
//!
//! Delivery removes the message from the broker before the caller processes
//! it. A worker that dies mid-task therefore loses that delivery for good;
//! only the store-driven recovery sweep brings the task back.

pub mod memory;
pub mod pgmq;

pub use memory::InMemoryQueue;
pub use pgmq::PgmqQueue;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Priority;

#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Publish one message body onto `channel`, declaring it first if this
    /// client has not declared it yet.
    async fn publish(&self, channel: &str, body: &str) -> Result<()>;

    /// Take at most one message off `channel` on behalf of `consumer`.
    ///
    /// The message counts as acknowledged as soon as it is returned.
    async fn receive(&self, channel: &str, consumer: &str) -> Result<Option<String>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;
}

/// Names of the three priority channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    pub high: String,
    pub normal: String,
    pub low: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            high: "jobs_high".to_string(),
            normal: "jobs_normal".to_string(),
            low: "jobs_low".to_string(),
        }
    }
}

impl ChannelNames {
    /// Channel carrying tasks of the given priority.
    pub fn for_priority(&self, priority: Priority) -> &str {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    /// All three channels, highest priority first.
    pub fn all(&self) -> [&str; 3] {
        [&self.high, &self.normal, &self.low]
    }
}
