//! In-memory ranking infrastructure: sorted set, KV cache, snapshot store,
//! and idempotency ledger, with failure injection for degradation tests.

use chrono::NaiveDate;
use commerce_core::error::StoreError;
use commerce_core::ids::EventId;
use commerce_core::store::{IdempotencyLedger, KVCache, SnapshotStore, SortedSetStore};
use commerce_core::view::RankingSnapshot;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn unavailable() -> StoreError {
    StoreError::Unavailable("injected outage".into())
}

/// In-memory sorted set with the same operation surface as the Redis store.
///
/// Ties order by member ascending for determinism. `set_available(false)`
/// makes every operation fail, simulating a Redis outage.
#[derive(Default)]
pub struct InMemorySortedSet {
    sets: Mutex<HashMap<String, HashMap<String, f64>>>,
    ttls: Mutex<HashMap<String, Duration>>,
    available: AtomicBool,
}

impl InMemorySortedSet {
    /// Create an empty, available store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            ttls: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Shared handle.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Toggle the simulated outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable())
        }
    }

    /// Current score of a member, for assertions.
    pub async fn score(&self, key: &str, member: &str) -> Option<f64> {
        self.sets.lock().await.get(key)?.get(member).copied()
    }

    /// TTL recorded for a key, for assertions.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        self.ttls.lock().await.get(key).copied()
    }

    async fn sorted_desc(&self, key: &str) -> Vec<(String, f64)> {
        let sets = self.sets.lock().await;
        let Some(members) = sets.get(key) else {
            return Vec::new();
        };
        let mut entries: Vec<(String, f64)> =
            members.iter().map(|(m, s)| (m.clone(), *s)).collect();
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        entries
    }
}

impl SortedSetStore for InMemorySortedSet {
    async fn incr_score(&self, key: &str, member: &str, delta: f64) -> Result<f64, StoreError> {
        self.check()?;
        let mut sets = self.sets.lock().await;
        let score = sets
            .entry(key.to_owned())
            .or_default()
            .entry(member.to_owned())
            .or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn range_desc(&self, key: &str, start: i64, stop: i64) -> Result<Vec<(String, f64)>, StoreError> {
        self.check()?;
        let entries = self.sorted_desc(key).await;
        let len = entries.len() as i64;
        let resolve = |index: i64| if index < 0 { len + index } else { index };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(len - 1);
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        let (start, stop) = (usize::try_from(start).unwrap_or(0), usize::try_from(stop).unwrap_or(0));
        Ok(entries[start..=stop].to_vec())
    }

    async fn rank_desc(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
        self.check()?;
        let entries = self.sorted_desc(key).await;
        Ok(entries.iter().position(|(m, _)| m == member).map(|p| p as u64))
    }

    async fn card(&self, key: &str) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.sets.lock().await.get(key).map_or(0, |m| m.len() as u64))
    }

    async fn expire_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        if !self.sets.lock().await.contains_key(key) {
            return Ok(false);
        }
        let mut ttls = self.ttls.lock().await;
        if ttls.contains_key(key) {
            return Ok(false);
        }
        ttls.insert(key.to_owned(), ttl);
        Ok(true)
    }

    async fn union_weighted(&self, dest: &str, sources: &[(String, f64)]) -> Result<u64, StoreError> {
        self.check()?;
        let mut sets = self.sets.lock().await;
        let mut merged: HashMap<String, f64> = HashMap::new();
        for (source, weight) in sources {
            if let Some(members) = sets.get(source) {
                for (member, score) in members {
                    *merged.entry(member.clone()).or_insert(0.0) += score * weight;
                }
            }
        }
        let cardinality = merged.len() as u64;
        sets.insert(dest.to_owned(), merged);
        Ok(cardinality)
    }
}

/// In-memory JSON cache.
#[derive(Default)]
pub struct InMemoryKVCache {
    values: Mutex<HashMap<String, serde_json::Value>>,
    available: AtomicBool,
}

impl InMemoryKVCache {
    /// Create an empty, available cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle the simulated outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable())
        }
    }
}

impl KVCache for InMemoryKVCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.check()?;
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &serde_json::Value, _ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.values.lock().await.insert(key.to_owned(), value.clone());
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.values.lock().await.remove(key);
        Ok(())
    }
}

/// In-memory snapshot store.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<NaiveDate, RankingSnapshot>>,
    available: AtomicBool,
}

impl InMemorySnapshotStore {
    /// Create an empty, available store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle the simulated outage.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable())
        }
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &RankingSnapshot) -> Result<(), StoreError> {
        self.check()?;
        self.snapshots
            .lock()
            .await
            .insert(snapshot.date, snapshot.clone());
        Ok(())
    }

    async fn get(&self, date: NaiveDate) -> Result<Option<RankingSnapshot>, StoreError> {
        self.check()?;
        Ok(self.snapshots.lock().await.get(&date).cloned())
    }
}

/// In-memory idempotency ledger over a hash set.
#[derive(Default)]
pub struct InMemoryIdempotencyLedger {
    seen: Mutex<HashSet<EventId>>,
}

impl InMemoryIdempotencyLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded event ids.
    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    /// Whether the ledger is empty.
    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }
}

impl IdempotencyLedger for InMemoryIdempotencyLedger {
    async fn record(&self, event_id: EventId) -> Result<bool, StoreError> {
        Ok(self.seen.lock().await.insert(event_id))
    }
}
