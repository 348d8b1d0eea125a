//! Small TTL cache keyed by tenant.
//!
//! Entries are refreshed on demand after they expire. The cache owns its
//! synchronization; callers never lock around it.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh value for `key`, if any.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .write()
            .await
            .insert(key, Entry { value, expires_at });
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    /// Return the cached value, or run `load` and cache its result.
    ///
    /// Load errors are returned and nothing is cached. Concurrent misses may
    /// each load; the last write wins.
    pub async fn get_or_try_load<F, Fut, E>(&self, key: K, load: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok((value, true));
        }
        let value = load().await?;
        self.insert(key, value.clone()).await;
        Ok((value, false))
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().await.retain(|_, e| e.expires_at > now);
    }
}
