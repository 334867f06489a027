//! Redis-backed execution lock.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::{debug, error, info};

use super::{DistributedLock, LockToken};
use crate::config::secrets::redact_url;
use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, retry};

/// Deletes the key only if it still carries our token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Execution lock over a shared Redis.
///
/// Each successful acquisition stores a fresh token as the key's value and
/// hands it to the caller; unlock only deletes the key while that token is
/// still there. A holder whose lock expired and was taken over cannot release
/// the new holder's lock, even through the same client.
pub struct RedisLock {
    conn: ConnectionManager,
    unlock_script: Script,
}

impl std::fmt::Debug for RedisLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLock")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisLock {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Lock(format!("failed to create Redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Lock(format!("failed to connect to Redis: {e}")))?;

        Ok(Self {
            conn,
            unlock_script: Script::new(UNLOCK_SCRIPT),
        })
    }

    /// Connect and ping, retrying at a constant 3s interval up to 5 times.
    pub async fn connect_with_retry(redis_url: &str) -> Result<Self> {
        let policy = RetryPolicy::constant(Duration::from_secs(3), 5);
        let redacted = redact_url(redis_url);
        let lock = retry(&policy, |attempt| {
            let redacted = redacted.clone();
            async move {
                let lock = Self::connect(redis_url).await.inspect_err(|e| {
                    error!(url = %redacted, attempt, error = %e, "redis connection failed")
                })?;
                lock.ping().await?;
                Ok(lock)
            }
        })
        .await?;
        info!(url = %redacted, "connected to redis");
        Ok(lock)
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let token = LockToken::generate();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        let acquired = reply.is_some();
        debug!(key, acquired, ttl_ms, "lock attempt");
        Ok(acquired.then_some(token))
    }

    async fn unlock(&self, key: &str, token: &LockToken) -> Result<()> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .unlock_script
            .key(key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            debug!(key, "lock already expired or taken over");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
