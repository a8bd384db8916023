//! JSON key-value cache with TTL, used for catalog hot reads.

use crate::error::map_redis_err;
use commerce_core::error::StoreError;
use commerce_core::store::KVCache;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Redis-backed [`KVCache`] storing values as JSON strings.
#[derive(Clone)]
pub struct RedisKVCache {
    conn: ConnectionManager,
}

impl RedisKVCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("failed to create redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to connect to redis: {e}")))?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl KVCache for RedisKVCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(map_redis_err)?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &serde_json::Value, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let json = value.to_string();
        let () = conn
            .set_ex(key, json, ttl.as_secs())
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let () = conn.del(key).await.map_err(map_redis_err)?;
        Ok(())
    }
}
