//! In-memory execution lock for tests and local runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{DistributedLock, LockToken};
use crate::error::{Error, Result};

/// Process-local lock with the same expiry and ownership rules as
/// [`super::RedisLock`]. Uses tokio's clock, so paused-time tests can
/// expire locks with `tokio::time::advance`.
#[derive(Default)]
pub struct InMemoryLock {
    /// key -> (token, expiry)
    held: Mutex<HashMap<String, (LockToken, Instant)>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (LockToken, Instant)>>> {
        self.held
            .lock()
            .map_err(|_| Error::Lock("in-memory lock mutex poisoned".to_string()))
    }

    /// Is `key` currently held by anyone?
    pub fn is_held(&self, key: &str) -> bool {
        self.lock()
            .map(|held| {
                held.get(key)
                    .is_some_and(|(_, expiry)| *expiry > Instant::now())
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let mut held = self.lock()?;
        let now = Instant::now();
        if held.get(key).is_some_and(|(_, expiry)| *expiry > now) {
            return Ok(None);
        }
        let token = LockToken::generate();
        held.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn unlock(&self, key: &str, token: &LockToken) -> Result<()> {
        let mut held = self.lock()?;
        if held.get(key).is_some_and(|(current, _)| current == token) {
            held.remove(key);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }
}
