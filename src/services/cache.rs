//! In-process TTL cache for catalog reads.
//!
//! Only product and category listings go through here. Voucher, quota and
//! transaction decisions always read the database.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;

#[derive(Clone)]
pub struct TtlCache<V> {
    ttl: Duration,
    capacity: usize,
    entries: Arc<RwLock<HashMap<String, (Instant, V)>>>,
}

impl<V: Clone> TtlCache<V> {
    /// Cache holding at most `capacity` keys for `ttl` each.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fresh value for `key`, if any.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    /// Store `value` under `key`.
    ///
    /// Stale entries are dropped first. A new key is not stored while the
    /// cache is at capacity; existing keys are always refreshed.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        if self.ttl.is_zero() || self.capacity == 0 {
            return;
        }
        let key = key.into();
        let mut entries = self.entries.write().await;

        let ttl = self.ttl;
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            tracing::debug!(key = %key, capacity = self.capacity, "catalog cache full, not caching");
            return;
        }
        entries.insert(key, (Instant::now(), value));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        let dropped = entries.len();
        entries.clear();
        tracing::trace!(dropped, "catalog cache cleared");
    }
}
