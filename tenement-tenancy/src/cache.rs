//! Bounded, expiring LRU cache
//!
//! Backs both the resolved-tenant cache and the factory-built handler cache.
//! Expiry is lazy: a stale entry is dropped by the read that finds it.
//! [`ExpiringCache::purge_expired`] sweeps explicitly when a caller wants to.
//!
//! Ages are measured with `tokio::time::Instant`, so tests can drive expiry
//! with `tokio::time::pause()` and `advance()`.

use crate::config::CacheConfig;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Counters for cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries displaced by capacity pressure
    pub evictions: u64,
    /// Entries dropped because they outlived the TTL
    pub expirations: u64,
}

/// Thread-safe LRU cache with a per-entry time-to-live.
///
/// A single mutex covers every operation. With a zero TTL the cache is
/// disabled: `set` stores nothing and every `get` misses.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tenement_tenancy::ExpiringCache;
///
/// let cache = ExpiringCache::new(2, Duration::from_secs(60));
/// cache.set("a", 1);
/// assert_eq!(cache.get("a"), Some(1));
/// assert_eq!(cache.get("b"), None);
/// ```
pub struct ExpiringCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> ExpiringCache<V> {
    /// Create a cache. A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Look up a live entry and mark it most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.is_enabled() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut entries = self.entries.lock();
        let expired = match entries.peek(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
        };

        if expired {
            entries.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        self.is_enabled()
            && self
                .entries
                .lock()
                .peek(key)
                .is_some_and(|entry| entry.inserted_at.elapsed() < self.ttl)
    }

    /// Insert or replace an entry, evicting the least recently used key when full.
    pub fn set(&self, key: impl Into<String>, value: V) {
        if !self.is_enabled() {
            return;
        }

        let key = key.into();
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
        };

        let mut entries = self.entries.lock();
        if let Some((displaced, _)) = entries.push(key.clone(), entry)
            && displaced != key
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove an entry, returning whether one existed.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Remove every entry whose key satisfies `matches`. Returns how many were removed.
    pub fn delete_matching<F>(&self, matches: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| matches(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            entries.pop(key);
        }
        self.expirations
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        stale.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for ExpiringCache<V> {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl<V> std::fmt::Debug for ExpiringCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("ExpiringCache")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_get_and_set() {
        let cache = ExpiringCache::new(4, MINUTE);
        assert_eq!(cache.get("acme"), None);

        cache.set("acme", "Acme Corp".to_string());
        assert_eq!(cache.get("acme").as_deref(), Some("Acme Corp"));
        assert!(cache.contains("acme"));

        cache.set("acme", "Acme Industries".to_string());
        assert_eq!(cache.get("acme").as_deref(), Some("Acme Industries"));
        assert_eq!(cache.len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction_removes_least_recently_used() {
        let cache = ExpiringCache::new(3, MINUTE);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);

        // Touching "a" makes "b" the oldest.
        assert_eq!(cache.get("a"), Some(1));
        cache.set("d", 4);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.get("d"), Some(4));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_capacity_plus_one_evicts_exactly_first_key() {
        let cache = ExpiringCache::new(128, MINUTE);
        for i in 0..=128 {
            cache.set(format!("key-{}", i), i);
        }

        assert_eq!(cache.len(), 128);
        assert_eq!(cache.get("key-0"), None);
        for i in 1..=128 {
            assert_eq!(cache.get(&format!("key-{}", i)), Some(i));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ExpiringCache::new(4, MINUTE);
        cache.set("acme", 1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("acme"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("acme"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_restarts_ttl() {
        let cache = ExpiringCache::new(4, MINUTE);
        cache.set("acme", 1);
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.set("acme", 2);
        tokio::time::advance(Duration::from_secs(45)).await;

        assert_eq!(cache.get("acme"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = ExpiringCache::new(8, MINUTE);
        cache.set("old-1", 1);
        cache.set("old-2", 2);
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.set("fresh", 3);

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(3));
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let cache = ExpiringCache::new(4, Duration::ZERO);
        cache.set("acme", 1);

        assert_eq!(cache.get("acme"), None);
        assert!(cache.is_empty());
        assert!(!cache.is_enabled());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = ExpiringCache::new(4, MINUTE);
        cache.set("a", 1);
        cache.set("b", 2);

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.get("a"), None);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let cache = ExpiringCache::new(8, MINUTE);
        cache.set("acme.io", 1);
        cache.set("ACME.IO", 2);
        cache.set("globex.io", 3);

        let removed = cache.delete_matching(|key| key.eq_ignore_ascii_case("acme.io"));
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("globex.io"), Some(3));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: ExpiringCache<u8> = ExpiringCache::new(0, MINUTE);
        assert_eq!(cache.capacity(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access() {
        let cache = std::sync::Arc::new(ExpiringCache::new(64, MINUTE));
        let mut tasks = Vec::new();

        for worker in 0..8 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..200 {
                    let key = format!("k{}", (worker * 7 + i) % 96);
                    if cache.get(&key).is_none() {
                        cache.set(key, i);
                    }
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert!(cache.len() <= 64);
    }
}
