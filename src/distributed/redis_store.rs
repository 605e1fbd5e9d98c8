//! Redis-backed lock store

use crate::distributed::{CoordinationResult, LockStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Lock store over a shared Redis instance
///
/// Leases use `SET key owner NX EX secs`, so the lock and its expiry are set
/// atomically.
#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
}

impl RedisLockStore {
    /// Connects to Redis
    ///
    /// # Arguments
    ///
    /// * `url` - Connection URL, e.g. `redis://127.0.0.1:6379/0`
    ///
    /// # Returns
    ///
    /// * `Ok(RedisLockStore)` - Connected store
    /// * `Err(CoordinationError)` - Bad URL or unreachable server
    pub async fn connect(url: &str) -> CoordinationResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!("Connected to lock store at {}", url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_acquire(&self, key: &str, owner: &str, lease: Duration) -> CoordinationResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(lease.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn put(&self, key: &str, value: &str) -> CoordinationResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> CoordinationResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        assert!(RedisLockStore::connect("not-a-redis-url").await.is_err());
    }
}
