//! In-memory cache implementation with LRU eviction.
//!
//! Provides a thread-safe in-memory cache with TTL support using
//! tokio synchronization primitives and LRU eviction policy. It serves as
//! the local tier of the coordinator and as the fallback store of the cache
//! manager, so it also implements counters and existence filters the same
//! way the Redis backend does.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::RwLock;
use tokio::time::Instant;

use techstore_core::cache::{
    pattern_matches, Cache, CacheError, CounterStore, ExistenceFilter, Result,
};

use super::filter::{BloomFilter, FilterConfig};

/// A single cache entry with optional expiration.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        Self { value, expires_at }
    }

    /// An entry is gone once its TTL has fully elapsed.
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// In-memory cache implementation with LRU eviction.
///
/// Thread-safe cache using `Arc<RwLock<LruCache>>` for concurrent access.
/// Supports TTL with lazy expiration: an expired entry is removed by the
/// `get` that finds it, there is no background sweep.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    store: Arc<RwLock<LruCache<String, CacheEntry>>>,
    filters: Arc<RwLock<HashMap<String, BloomFilter>>>,
    filter_config: FilterConfig,
}

impl MemoryCache {
    /// Creates a new in-memory cache holding at most `max_entries` keys.
    ///
    /// A zero capacity is treated as one.
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: Arc::new(RwLock::new(LruCache::new(capacity))),
            filters: Arc::new(RwLock::new(HashMap::new())),
            filter_config: FilterConfig::default(),
        }
    }

    /// Sets the sizing used for existence filters created from now on.
    pub fn with_filter_config(mut self, config: FilterConfig) -> Self {
        self.filter_config = config;
        self
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every entry and filter.
    pub async fn clear(&self) {
        self.store.write().await.clear();
        self.filters.write().await.clear();
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut store = self.store.write().await;

        match store.get(key) {
            Some(entry) if entry.is_expired() => {
                store.pop(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut store = self.store.write().await;
        store.put(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut store = self.store.write().await;
        store.pop(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let mut store = self.store.write().await;
        let matching: Vec<String> = store
            .iter()
            .filter(|(key, _)| pattern_matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = Vec::with_capacity(matching.len());
        for key in matching {
            // Expired entries are dropped but were already logically absent
            if let Some(entry) = store.pop(&key) {
                if !entry.is_expired() {
                    removed.push(key);
                }
            }
        }

        Ok(removed)
    }
}

#[async_trait]
impl CounterStore for MemoryCache {
    async fn increment_window(&self, key: &str, window: Duration) -> Result<u64> {
        let mut store = self.store.write().await;

        let current = match store.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.clone()),
            _ => None,
        };

        let (count, expires_at) = match current {
            Some(entry) => {
                let count = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| {
                        CacheError::OperationFailed(format!(
                            "value at {} is not an integer counter",
                            key
                        ))
                    })?;
                (count + 1, entry.expires_at)
            }
            None => (1, Some(Instant::now() + window)),
        };

        store.put(
            key.to_string(),
            CacheEntry {
                value: count.to_string().into_bytes(),
                expires_at,
            },
        );

        Ok(count)
    }
}

#[async_trait]
impl ExistenceFilter for MemoryCache {
    async fn filter_add(&self, filter: &str, item: &str) -> Result<bool> {
        let mut filters = self.filters.write().await;
        let bloom = filters
            .entry(filter.to_string())
            .or_insert_with(|| BloomFilter::new(self.filter_config));
        Ok(bloom.insert(item))
    }

    async fn filter_contains(&self, filter: &str, item: &str) -> Result<bool> {
        let filters = self.filters.read().await;
        Ok(filters
            .get(filter)
            .is_some_and(|bloom| bloom.contains(item)))
    }
}
