//! Redis-backed sorted-set store.
//!
//! Every operation maps to a single Redis command, so the atomicity
//! guarantees of the trait are Redis's own: `ZINCRBY` is atomic per member,
//! `EXPIRE … NX` sets the TTL exactly once, and nothing locks across members.

use crate::error::map_redis_err;
use commerce_core::error::StoreError;
use commerce_core::store::SortedSetStore;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Sorted-set store over a Redis connection manager.
///
/// The connection manager multiplexes one connection and reconnects on
/// failure; clones share it.
#[derive(Clone)]
pub struct RedisSortedSetStore {
    conn: ConnectionManager,
}

impl RedisSortedSetStore {
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

impl SortedSetStore for RedisSortedSetStore {
    async fn incr_score(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError> {
        let mut conn = self.conn.clone();
        conn.zincr(key, member, delta).await.map_err(map_redis_err)
    }

    async fn range_desc(&self, key: &str, start: i64, stop: i64) -> Result<Vec<(String, f64)>, StoreError> {
        let mut conn = self.conn.clone();
        let start = isize::try_from(start).unwrap_or(isize::MAX);
        let stop = isize::try_from(stop).unwrap_or(isize::MAX);
        conn.zrevrange_withscores(key, start, stop)
            .await
            .map_err(map_redis_err)
    }

    async fn rank_desc(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn.clone();
        conn.zrevrank(key, member).await.map_err(map_redis_err)
    }

    async fn card(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.zcard(key).await.map_err(map_redis_err)
    }

    async fn expire_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // EXPIRE … NX needs the raw command form; the high-level helper has
        // no flag support.
        let set: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(set == 1)
    }

    async fn union_weighted(&self, dest: &str, sources: &[(String, f64)]) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("ZUNIONSTORE");
        cmd.arg(dest).arg(sources.len());
        for (key, _) in sources {
            cmd.arg(key);
        }
        cmd.arg("WEIGHTS");
        for (_, weight) in sources {
            cmd.arg(*weight);
        }
        cmd.query_async(&mut conn).await.map_err(map_redis_err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // These tests require a running Redis instance:
    // docker run -d -p 6379:6379 redis:7-alpine

    async fn store() -> RedisSortedSetStore {
        RedisSortedSetStore::connect("redis://127.0.0.1:6379")
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn incr_and_range() {
        let zset = store().await;
        let key = format!("test:zset:{}", uuid_like());
        zset.incr_score(&key, "1", 0.2).await.unwrap();
        zset.incr_score(&key, "2", 0.7).await.unwrap();
        zset.incr_score(&key, "1", 0.2).await.unwrap();

        let top = zset.range_desc(&key, 0, -1).await.unwrap();
        assert_eq!(top[0].0, "2");
        assert!((top[1].1 - 0.4).abs() < 1e-9);
        assert_eq!(zset.rank_desc(&key, "2").await.unwrap(), Some(0));
        assert_eq!(zset.card(&key).await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn expire_nx_sets_once() {
        let zset = store().await;
        let key = format!("test:zset:{}", uuid_like());
        zset.incr_score(&key, "1", 1.0).await.unwrap();
        assert!(zset.expire_if_absent(&key, Duration::from_secs(120)).await.unwrap());
        assert!(!zset.expire_if_absent(&key, Duration::from_secs(240)).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn union_weighted_carries_scores() {
        let zset = store().await;
        let a = format!("test:zset:a:{}", uuid_like());
        let b = format!("test:zset:b:{}", uuid_like());
        zset.incr_score(&a, "1", 10.0).await.unwrap();
        zset.incr_score(&b, "1", 4.0).await.unwrap();

        let cardinality = zset
            .union_weighted(&b, &[(b.clone(), 1.0), (a.clone(), 0.1)])
            .await
            .unwrap();
        assert_eq!(cardinality, 1);
        let top = zset.range_desc(&b, 0, -1).await.unwrap();
        assert!((top[0].1 - 5.0).abs() < 1e-9);
    }

    fn uuid_like() -> u128 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    }
}
