//! Shared counter store access.
//!
//! [`CounterStore`] is the narrow contract the shared backend needs from a
//! centralized store: an atomic increment that arms an expiry on first use, a
//! plain read, and a liveness probe. [`RedisStore`] implements it on Redis
//! with every round trip bounded by a timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use super::backend::BackendError;

/// Increment a counter and arm its expiry when the increment created it.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Atomic counter primitives offered by a centralized store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return the new value. When the new value
    /// is 1 the key expires after `ttl`.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, BackendError>;

    /// Current value of `key`, zero when absent.
    async fn count(&self, key: &str) -> Result<u64, BackendError>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), BackendError>;
}

/// Redis-backed counter store.
///
/// The connection is established lazily so a store that is down at startup can
/// be picked up later by a recovery probe.
pub struct RedisStore {
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    increment: Script,
    timeout: Duration,
}

impl RedisStore {
    /// Create a store for `redis_url`. No connection is made until first use.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `timeout` - Upper bound for connecting and for each command
    pub fn open(redis_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            increment: Script::new(INCREMENT_SCRIPT),
            timeout,
        })
    }

    /// Shared connection, established on first use.
    ///
    /// Waiting for the slot and connecting share one deadline, so callers
    /// queued behind a slow connect give up after a single timeout.
    async fn connection(&self) -> Result<ConnectionManager, BackendError> {
        let deadline = Instant::now() + self.timeout;
        let mut slot = timeout_at(deadline, self.conn.lock())
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        debug!("Connecting to counter store");
        let conn = match timeout_at(deadline, ConnectionManager::new(self.client.clone())).await {
            Ok(result) => result?,
            Err(_) => return Err(BackendError::Timeout(self.timeout)),
        };
        info!("Connected to counter store");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, BackendError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(BackendError::from),
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, BackendError> {
        let mut conn = self.connection().await?;
        let invocation = {
            let mut invocation = self.increment.key(key);
            invocation.arg(ttl.as_secs());
            invocation
        };
        let count: u64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(count)
    }

    async fn count(&self, key: &str) -> Result<u64, BackendError> {
        let mut conn = self.connection().await?;
        let value: Option<u64> = self.bounded(conn.get(key)).await?;
        Ok(value.unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let _pong: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
