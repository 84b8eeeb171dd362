use std::time::Duration;

use async_trait::async_trait;

use super::Result;

/// Trait for basic cache operations.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Gets a value from the cache by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Sets a value in the cache with an optional TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Deletes a value from the cache by key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Deletes all values matching a glob pattern (e.g., "user:*").
    ///
    /// Returns the keys that were removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<Vec<String>>;
}

/// Windowed counters used for rate limiting.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments the counter at `key` and returns the new value.
    ///
    /// When the increment creates the counter, the counter expires after
    /// `window`. Later increments within the window do not extend it.
    async fn increment_window(&self, key: &str, window: Duration) -> Result<u64>;
}

/// Named probabilistic membership sets.
///
/// Implementations never report a false negative but may report false
/// positives.
#[async_trait]
pub trait ExistenceFilter: Send + Sync {
    /// Adds `item` to the filter `filter`, creating the filter if needed.
    ///
    /// Returns true if the item was (probably) not present before.
    async fn filter_add(&self, filter: &str, item: &str) -> Result<bool>;

    /// Returns true if `item` may be in `filter`, false if it is definitely absent.
    async fn filter_contains(&self, filter: &str, item: &str) -> Result<bool>;
}

/// Combined trait for the distributed tier of the cache coordinator.
pub trait DistributedCache: Cache + CounterStore + ExistenceFilter {}

impl<T: Cache + CounterStore + ExistenceFilter> DistributedCache for T {}

/// Establishes connections to a remote cache.
///
/// Used by the cache manager so that connection attempts can be retried and
/// bounded by a timeout without knowing the concrete backend.
#[async_trait]
pub trait CacheConnector: Send + Sync {
    /// Short backend name used in logs (e.g. "redis").
    fn backend_name(&self) -> &'static str;

    /// Opens a connection to the remote cache.
    async fn connect(&self) -> Result<std::sync::Arc<dyn Cache>>;
}
