//! Read-mostly keyed cache with get-or-create semantics.
//!
//! Used for tenant configuration (with a TTL), discovered issuer metadata and
//! JWKS key sets (process lifetime). Insertion is first-writer-wins: two
//! concurrent misses may both run the initializer, but only the first result
//! is kept and both callers observe it.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

#[derive(Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A shared cache keyed by `K`.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Clone)]
pub struct KeyedCache<K, V> {
    entries: Arc<RwLock<HashMap<K, Entry<V>>>>,
    ttl: Option<Duration>,
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache whose entries never expire.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: None,
        }
    }

    /// Creates a cache whose entries are refetched after `ttl`.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Some(ttl),
        }
    }

    fn is_fresh(&self, entry: &Entry<V>) -> bool {
        self.ttl
            .is_none_or(|ttl| entry.inserted_at.elapsed() < ttl)
    }

    /// Returns the cached value if present and fresh.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.value.clone())
    }

    /// Returns the cached value or runs `init` and caches its result.
    ///
    /// Errors from `init` are returned unchanged and nothing is cached.
    pub async fn get_or_try_insert<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }

        // No lock is held while the initializer runs.
        let value = init().await?;

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&key).filter(|entry| self.is_fresh(entry)) {
            return Ok(existing.value.clone());
        }
        entries.insert(
            key,
            Entry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Drops the entry for `key`, if any.
    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    /// Number of entries, fresh or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<K, V> Default for KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn initializer_runs_once_per_key() {
        let cache: KeyedCache<String, u32> = KeyedCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert("a".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: KeyedCache<&'static str, u32> = KeyedCache::new();

        let failed = cache
            .get_or_try_insert("k", || async { Err::<u32, _>("boom") })
            .await;
        assert_eq!(failed, Err("boom"));
        assert!(cache.is_empty().await);

        let value = cache
            .get_or_try_insert("k", || async { Ok::<_, &str>(1) })
            .await;
        assert_eq!(value, Ok(1));
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let cache: KeyedCache<&'static str, u32> = KeyedCache::with_ttl(Duration::ZERO);

        cache
            .get_or_try_insert("k", || async { Ok::<_, ()>(1) })
            .await
            .unwrap();
        assert_eq!(cache.get(&"k").await, None);

        let value = cache
            .get_or_try_insert("k", || async { Ok::<_, ()>(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn keys_do_not_cross() {
        let cache: KeyedCache<&'static str, &'static str> = KeyedCache::new();
        cache
            .get_or_try_insert("tenant-a", || async { Ok::<_, ()>("issuer-a") })
            .await
            .unwrap();
        cache
            .get_or_try_insert("tenant-b", || async { Ok::<_, ()>("issuer-b") })
            .await
            .unwrap();

        assert_eq!(cache.get(&"tenant-a").await, Some("issuer-a"));
        assert_eq!(cache.get(&"tenant-b").await, Some("issuer-b"));
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache: KeyedCache<&'static str, u32> = KeyedCache::new();
        cache
            .get_or_try_insert("k", || async { Ok::<_, ()>(1) })
            .await
            .unwrap();
        cache.invalidate(&"k").await;
        assert_eq!(cache.len().await, 0);
    }
}
