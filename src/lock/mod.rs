//! Distributed execution lock.
//!
//! One lock per task, keyed `lock:{task_id}`, held with a TTL so a crashed
//! holder cannot wedge a task forever. There is no renewal: execution that
//! outlives the TTL loses exclusivity.
//!
//! Implementations:
//! - [`RedisLock`]: SET NX PX with a per-acquisition token (production)
//! - [`InMemoryLock`]: process-local, for tests and local runs

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryLock;
pub use self::redis::RedisLock;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::model::TaskId;
use crate::telemetry::metrics;

/// Proof of one successful acquisition. Only the holder of the matching token
/// can release the lock it was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// A fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take `key` for `ttl`. `Ok(None)` if someone else holds it.
    ///
    /// Never blocks waiting for the current holder.
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>>;

    /// Release `key` if it is still held under `token`. Releasing a lock that
    /// has expired or was taken over is a no-op.
    async fn unlock(&self, key: &str, token: &LockToken) -> Result<()>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;
}

/// Run `body` while holding the execution lock for task `id`.
///
/// Returns `Ok(None)` without running `body` if the lock is held elsewhere.
/// Once acquired, the lock is released whether `body` succeeds or fails; an
/// unlock error is logged and does not replace the body's result.
pub async fn with_task_lock<L, F, Fut, T>(
    lock: &L,
    id: TaskId,
    ttl: Duration,
    body: F,
) -> Result<Option<T>>
where
    L: DistributedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let key = id.lock_key();
    let token = match lock.try_lock(&key, ttl).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            metrics::lock_acquisitions().add(1, &[KeyValue::new("result", "contended")]);
            return Ok(None);
        }
        Err(e) => {
            metrics::lock_acquisitions().add(1, &[KeyValue::new("result", "error")]);
            return Err(e);
        }
    };
    metrics::lock_acquisitions().add(1, &[KeyValue::new("result", "acquired")]);

    let out = body().await;

    if let Err(e) = lock.unlock(&key, &token).await {
        warn!(task_id = %id, key = %key, error = %e, "failed to release lock");
    }
    Ok(Some(out))
}
