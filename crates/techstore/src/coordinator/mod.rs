//! Two-tier cache in front of an authoritative backing store.
//!
//! Reads go local tier, then distributed tier, then backing store, and a hit
//! at a lower level fills every level above it. Writes either go to the store
//! first (write-through) or to the caches first with the store updated later
//! (write-behind). The distributed tier also carries the rate-limit counters
//! and existence filters.

mod write_behind;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use techstore_core::cache::{
    deserialize_value, serialize_value, Cache, CacheError, CounterStore, DistributedCache,
    ExistenceFilter,
};
use techstore_core::storage::{BackingStore, StoreError};

use crate::cache::MemoryCache;

pub use write_behind::FlushFailure;
use write_behind::WriteBehindQueue;

/// Errors returned by the coordinator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Backing store error: {0}")]
    Store(#[from] StoreError),
    #[error("Cache error: {0}")]
    Cache(CacheError),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Write-behind queue is closed")]
    QueueClosed,
}

impl From<CacheError> for CoordinatorError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Serialization(msg) => Self::Serialization(msg),
            other => Self::Cache(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// The cache tier a value was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Local,
    Distributed,
}

/// A value returned by [`DistributedCacheCoordinator::get_with_cache`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<T> {
    pub value: T,
    /// Tier that served the read, `None` when it came from the backing store.
    pub tier: Option<CacheTier>,
}

/// Hit and miss counters per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub local_hits: u64,
    pub local_misses: u64,
    pub distributed_hits: u64,
    pub distributed_misses: u64,
    pub store_hits: u64,
    pub store_misses: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    local_hits: AtomicU64,
    local_misses: AtomicU64,
    distributed_hits: AtomicU64,
    distributed_misses: AtomicU64,
    store_hits: AtomicU64,
    store_misses: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            local_misses: self.local_misses.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            distributed_misses: self.distributed_misses.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            store_misses: self.store_misses.load(Ordering::Relaxed),
        }
    }
}

/// Coordinator tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// TTL of every local-tier entry.
    pub local_ttl: Duration,
    /// TTL of distributed-tier entries filled from the backing store.
    pub distributed_ttl: Duration,
    pub local_max_entries: usize,
    pub write_behind_delay: Duration,
    pub write_behind_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            local_ttl: Duration::from_secs(30),
            distributed_ttl: Duration::from_secs(3_600),
            local_max_entries: 10_000,
            write_behind_delay: Duration::from_secs(5),
            write_behind_capacity: 1_024,
        }
    }
}

/// Multi-tier cache coordinator.
pub struct DistributedCacheCoordinator {
    store: Arc<dyn BackingStore>,
    distributed: Arc<dyn DistributedCache>,
    local: MemoryCache,
    config: CoordinatorConfig,
    stats: StatsCounters,
    write_behind: WriteBehindQueue,
}

impl DistributedCacheCoordinator {
    /// Creates a coordinator and starts its write-behind worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        store: Arc<dyn BackingStore>,
        distributed: Arc<dyn DistributedCache>,
        config: CoordinatorConfig,
    ) -> Self {
        let local = MemoryCache::new(config.local_max_entries);
        Self::with_local_tier(store, distributed, local, config)
    }

    /// Like [`new`](Self::new) with a caller-provided local tier.
    pub fn with_local_tier(
        store: Arc<dyn BackingStore>,
        distributed: Arc<dyn DistributedCache>,
        local: MemoryCache,
        config: CoordinatorConfig,
    ) -> Self {
        let write_behind = WriteBehindQueue::spawn(
            Arc::clone(&store),
            config.write_behind_delay,
            config.write_behind_capacity,
        );
        Self {
            store,
            distributed,
            local,
            config,
            stats: StatsCounters::default(),
            write_behind,
        }
    }

    pub fn local_tier(&self) -> &MemoryCache {
        &self.local
    }

    /// Persists `value` to the backing store, then refreshes both tiers.
    ///
    /// Nothing is cached if the store write fails. A distributed-tier failure
    /// after the store commit is logged and does not fail the call.
    pub async fn write_through<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let bytes = serialize_value(value)?;

        self.store.write(key, &bytes).await?;

        if let Err(err) = self.distributed.set(key, &bytes, Some(ttl)).await {
            tracing::warn!(key = %key, error = %err, "Distributed tier update failed after store commit");
        }
        self.set_local(key, &bytes).await;

        tracing::trace!(key = %key, "Write-through committed");
        Ok(())
    }

    /// Caches `value` in both tiers now and persists it after the
    /// write-behind delay.
    ///
    /// Waits for room when the write-behind queue is full.
    pub async fn write_behind<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serialize_value(value)?;

        if let Err(err) = self
            .distributed
            .set(key, &bytes, Some(self.config.distributed_ttl))
            .await
        {
            tracing::warn!(key = %key, error = %err, "Distributed tier update failed for write-behind");
        }
        self.set_local(key, &bytes).await;

        if !self.write_behind.enqueue(key, bytes).await {
            return Err(CoordinatorError::QueueClosed);
        }
        Ok(())
    }

    /// Reads `key` through the tiers, filling the tiers above the one that hit.
    ///
    /// Distributed-tier errors count as misses. Store errors are returned.
    pub async fn get_with_cache<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<CachedValue<T>>> {
        if let Some(bytes) = self.get_local(key).await {
            StatsCounters::bump(&self.stats.local_hits);
            tracing::trace!(key = %key, "Local tier hit");
            return Ok(Some(Self::decode(bytes, Some(CacheTier::Local))?));
        }
        StatsCounters::bump(&self.stats.local_misses);

        match self.distributed.get(key).await {
            Ok(Some(bytes)) => {
                StatsCounters::bump(&self.stats.distributed_hits);
                tracing::trace!(key = %key, "Distributed tier hit");
                self.set_local(key, &bytes).await;
                return Ok(Some(Self::decode(bytes, Some(CacheTier::Distributed))?));
            }
            Ok(None) => StatsCounters::bump(&self.stats.distributed_misses),
            Err(err) => {
                StatsCounters::bump(&self.stats.distributed_misses);
                tracing::warn!(key = %key, error = %err, "Distributed tier read failed, treating as miss");
            }
        }

        let Some(bytes) = self.store.read(key).await? else {
            StatsCounters::bump(&self.stats.store_misses);
            tracing::trace!(key = %key, "Backing store miss");
            return Ok(None);
        };
        StatsCounters::bump(&self.stats.store_hits);

        if let Err(err) = self
            .distributed
            .set(key, &bytes, Some(self.config.distributed_ttl))
            .await
        {
            tracing::warn!(key = %key, error = %err, "Failed to fill distributed tier");
        }
        self.set_local(key, &bytes).await;

        Ok(Some(Self::decode(bytes, None)?))
    }

    /// Deletes every key matching `pattern` from both tiers.
    ///
    /// The distributed tier is cleared before the local one. When it fails
    /// the local tier is left untouched and the error is returned.
    ///
    /// Returns the number of distinct keys removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let distributed = self.distributed.delete_pattern(pattern).await?;
        let local = self.local.delete_pattern(pattern).await?;

        let removed: BTreeSet<String> = distributed.into_iter().chain(local).collect();
        tracing::debug!(pattern = %pattern, removed = removed.len(), "Invalidated cache pattern");
        Ok(removed.len())
    }

    /// Counts a request against `key` and reports whether `limit` is exceeded.
    ///
    /// The window starts with the first request and resets when its counter
    /// expires.
    pub async fn rate_limit(&self, key: &str, limit: u64, window_seconds: u64) -> Result<bool> {
        let count = self
            .distributed
            .increment_window(key, Duration::from_secs(window_seconds))
            .await?;

        let exceeded = count > limit;
        if exceeded {
            tracing::debug!(key = %key, count, limit, "Rate limit exceeded");
        }
        Ok(exceeded)
    }

    /// Adds `item` to the existence filter `filter`.
    pub async fn existence_add(&self, filter: &str, item: &str) -> Result<bool> {
        Ok(self.distributed.filter_add(filter, item).await?)
    }

    /// Returns false only if `item` was never added to `filter`.
    pub async fn existence_check(&self, filter: &str, item: &str) -> Result<bool> {
        Ok(self.distributed.filter_contains(filter, item).await?)
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats.snapshot()
    }

    /// Deferred writes not yet persisted.
    pub fn pending_writes(&self) -> usize {
        self.write_behind.pending()
    }

    /// Receives every deferred write that failed to persist.
    pub fn subscribe_flush_failures(&self) -> broadcast::Receiver<FlushFailure> {
        self.write_behind.subscribe_failures()
    }

    /// Flushes pending deferred writes and stops the worker.
    ///
    /// Later `write_behind` calls fail with [`CoordinatorError::QueueClosed`].
    pub async fn shutdown(&self) {
        let pending = self.pending_writes();
        self.write_behind.shutdown().await;
        tracing::info!(flushed = pending, "Cache coordinator stopped");
    }

    async fn get_local(&self, key: &str) -> Option<Vec<u8>> {
        self.local.get(key).await.unwrap_or_else(|err| {
            tracing::warn!(key = %key, error = %err, "Local tier read failed");
            None
        })
    }

    async fn set_local(&self, key: &str, bytes: &[u8]) {
        if let Err(err) = self.local.set(key, bytes, Some(self.config.local_ttl)).await {
            tracing::warn!(key = %key, error = %err, "Local tier update failed");
        }
    }

    fn decode<T: DeserializeOwned>(bytes: Vec<u8>, tier: Option<CacheTier>) -> Result<CachedValue<T>> {
        let value = deserialize_value(&bytes)?;
        Ok(CachedValue { value, tier })
    }
}
