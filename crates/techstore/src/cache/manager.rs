//! Cache manager with transparent fallback to the in-process store.
//!
//! The manager talks to the remote cache while it is healthy. Once the remote
//! cannot be reached, at startup or on any later operation, it degrades for
//! the rest of the process lifetime and serves everything from its local
//! [`MemoryCache`]. Callers never see remote failures.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;

use techstore_core::cache::{
    deserialize_value, serialize_value, Cache, CacheConnector, CacheError, Result,
};
use techstore_core::connection::{ConnectionState, ConnectionStateCell, RetryPolicy};

use super::MemoryCache;

/// Single-key cache facade over a remote store and a local fallback.
pub struct CacheManager {
    connector: Option<Arc<dyn CacheConnector>>,
    retry: RetryPolicy,
    remote: RwLock<Option<Arc<dyn Cache>>>,
    local: MemoryCache,
    state: ConnectionStateCell,
}

impl CacheManager {
    /// Creates a manager that will connect through `connector` on
    /// [`initialize`](Self::initialize).
    pub fn new(connector: Arc<dyn CacheConnector>, local: MemoryCache) -> Self {
        Self {
            connector: Some(connector),
            retry: RetryPolicy::connection_setup(),
            remote: RwLock::new(None),
            local,
            state: ConnectionStateCell::default(),
        }
    }

    /// Creates a manager with remote caching turned off.
    pub fn local_only(local: MemoryCache) -> Self {
        Self {
            connector: None,
            retry: RetryPolicy::connection_setup(),
            remote: RwLock::new(None),
            local,
            state: ConnectionStateCell::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Connects to the remote store, or degrades if it cannot.
    ///
    /// Only the first call does anything; later calls return the current state.
    pub async fn initialize(&self) -> ConnectionState {
        let Some(connector) = self.connector.clone() else {
            if self.state.degrade() {
                tracing::info!("Remote cache disabled, using in-process store");
            }
            return self.state.get();
        };

        if !self
            .state
            .transition_from(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return self.state.get();
        }

        let backend = connector.backend_name();
        let outcome = self
            .retry
            .run(
                || {
                    let connector = Arc::clone(&connector);
                    async move { connector.connect().await }
                },
                |attempt, err| {
                    tracing::warn!(
                        backend,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %err,
                        "Remote cache connection attempt failed"
                    );
                },
            )
            .await;

        match outcome {
            Ok(remote) => {
                *self.remote.write().await = Some(remote);
                if self.state.transition(ConnectionState::Connected).is_ok() {
                    tracing::info!(backend, "Connected to remote cache");
                }
            }
            Err(err) => {
                self.state.degrade();
                tracing::warn!(
                    backend,
                    error = %err,
                    "Remote cache unavailable, falling back to in-process store"
                );
            }
        }

        self.state.get()
    }

    /// Returns the value stored under `key`, if any.
    ///
    /// A value that does not deserialize into `T` is reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.remote().await {
            Some(remote) => match remote.get(key).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.degrade(&err).await;
                    self.local_get(key).await
                }
            },
            None => self.local_get(key).await,
        };

        let Some(bytes) = bytes else {
            tracing::trace!(key = %key, "Cache miss");
            return None;
        };

        match deserialize_value(&bytes) {
            Ok(value) => {
                tracing::trace!(key = %key, "Cache hit");
                Some(value)
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Cached value deserialization failed");
                None
            }
        }
    }

    /// Stores `value` under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Serialization` if `value` cannot be serialized.
    /// Store failures are never returned.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let bytes = serialize_value(value)?;

        if let Some(remote) = self.remote().await {
            match remote.set(key, &bytes, Some(ttl)).await {
                Ok(()) => return Ok(()),
                Err(err) => self.degrade(&err).await,
            }
        }

        if let Err(err) = self.local.set(key, &bytes, Some(ttl)).await {
            tracing::warn!(key = %key, error = %err, "Failed to cache value locally");
        }
        Ok(())
    }

    /// Removes `key`.
    pub async fn delete(&self, key: &str) {
        if let Some(remote) = self.remote().await {
            match remote.delete(key).await {
                Ok(()) => return,
                Err(err) => self.degrade(&err).await,
            }
        }

        if let Err(err) = self.local.delete(key).await {
            tracing::warn!(key = %key, error = %err, "Failed to delete local cache entry");
        }
    }

    /// Returns true while operations go to the remote store.
    pub fn is_remote_available(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Releases the remote connection. Later operations use the local store.
    pub async fn shutdown(&self) {
        self.remote.write().await.take();
        if self.state.get() == ConnectionState::Connected
            && self.state.transition(ConnectionState::Disconnected).is_ok()
        {
            tracing::info!("Remote cache connection closed");
        }
    }

    async fn remote(&self) -> Option<Arc<dyn Cache>> {
        self.remote.read().await.clone()
    }

    async fn local_get(&self, key: &str) -> Option<Vec<u8>> {
        self.local.get(key).await.unwrap_or_else(|err| {
            tracing::warn!(key = %key, error = %err, "Local cache read failed");
            None
        })
    }

    async fn degrade(&self, err: &CacheError) {
        self.remote.write().await.take();
        if self.state.degrade() {
            tracing::warn!(
                error = %err,
                "Remote cache failed, switching to in-process store for the rest of the session"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TEST_MAX_ENTRIES: usize = 100;

    /// Remote cache double backed by a MemoryCache that can be made to fail.
    struct MockRemote {
        inner: MemoryCache,
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl MockRemote {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryCache::new(TEST_MAX_ENTRIES),
                failing: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }

        fn check(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(CacheError::ConnectionFailed("connection reset".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Cache for MockRemote {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.check()?;
            self.inner.delete(key).await
        }

        async fn delete_pattern(&self, pattern: &str) -> Result<Vec<String>> {
            self.check()?;
            self.inner.delete_pattern(pattern).await
        }
    }

    enum ConnectBehavior {
        Succeed,
        Refuse,
        Hang,
        RefuseThenSucceed(usize),
    }

    struct MockConnector {
        remote: Arc<MockRemote>,
        behavior: ConnectBehavior,
        attempts: AtomicUsize,
    }

    impl MockConnector {
        fn new(remote: Arc<MockRemote>, behavior: ConnectBehavior) -> Arc<Self> {
            Arc::new(Self {
                remote,
                behavior,
                attempts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CacheConnector for MockConnector {
        fn backend_name(&self) -> &'static str {
            "mock"
        }

        async fn connect(&self) -> Result<Arc<dyn Cache>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let refuse = match self.behavior {
                ConnectBehavior::Succeed => false,
                ConnectBehavior::Refuse => true,
                ConnectBehavior::Hang => {
                    std::future::pending::<()>().await;
                    true
                }
                ConnectBehavior::RefuseThenSucceed(n) => attempt <= n,
            };

            if refuse {
                return Err(CacheError::ConnectionFailed("connection refused".to_string()));
            }
            Ok(self.remote.clone() as Arc<dyn Cache>)
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Product {
        name: String,
    }

    fn phone() -> Product {
        Product {
            name: "Phone".to_string(),
        }
    }

    async fn connected_manager() -> (CacheManager, Arc<MockRemote>, MemoryCache) {
        let remote = MockRemote::new();
        let local = MemoryCache::new(TEST_MAX_ENTRIES);
        let manager = CacheManager::new(
            MockConnector::new(Arc::clone(&remote), ConnectBehavior::Succeed),
            local.clone(),
        );
        assert_eq!(manager.initialize().await, ConnectionState::Connected);
        (manager, remote, local)
    }

    #[tokio::test]
    async fn test_set_then_get_uses_remote() {
        let (manager, remote, local) = connected_manager().await;

        manager.set("product:42", &phone(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(manager.get::<Product>("product:42").await, Some(phone()));
        assert!(manager.is_remote_available());
        assert!(remote.inner.get("product:42").await.unwrap().is_some());
        assert!(local.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_removes_value() {
        let (manager, _remote, _local) = connected_manager().await;

        manager.set("user:1", &"ana", Duration::from_secs(60)).await.unwrap();
        manager.delete("user:1").await;

        assert_eq!(manager.get::<String>("user:1").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_remote_degrades_at_initialize() {
        let remote = MockRemote::new();
        let connector = MockConnector::new(Arc::clone(&remote), ConnectBehavior::Refuse);
        let manager = CacheManager::new(connector.clone(), MemoryCache::new(TEST_MAX_ENTRIES));

        assert_eq!(manager.initialize().await, ConnectionState::Degraded);
        assert!(!manager.is_remote_available());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);

        manager.set("product:42", &phone(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(manager.get::<Product>("product:42").await, Some(phone()));
        manager.delete("product:42").await;
        assert_eq!(manager.get::<Product>("product:42").await, None);

        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_connect_times_out_per_attempt() {
        let connector = MockConnector::new(MockRemote::new(), ConnectBehavior::Hang);
        let manager = CacheManager::new(connector.clone(), MemoryCache::new(TEST_MAX_ENTRIES));
        let started = tokio::time::Instant::now();

        assert_eq!(manager.initialize().await, ConnectionState::Degraded);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_succeeds_after_retry() {
        let connector =
            MockConnector::new(MockRemote::new(), ConnectBehavior::RefuseThenSucceed(2));
        let manager = CacheManager::new(connector.clone(), MemoryCache::new(TEST_MAX_ENTRIES));

        assert_eq!(manager.initialize().await, ConnectionState::Connected);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let remote = MockRemote::new();
        let connector = MockConnector::new(remote, ConnectBehavior::Succeed);
        let manager = CacheManager::new(connector.clone(), MemoryCache::new(TEST_MAX_ENTRIES));

        manager.initialize().await;
        manager.initialize().await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_local_only_never_connects() {
        let manager = CacheManager::local_only(MemoryCache::new(TEST_MAX_ENTRIES));

        assert_eq!(manager.initialize().await, ConnectionState::Degraded);
        manager.set("k", &1u32, Duration::from_secs(5)).await.unwrap();
        assert_eq!(manager.get::<u32>("k").await, Some(1));
    }

    #[tokio::test]
    async fn test_runtime_failure_degrades_once() {
        let (manager, remote, local) = connected_manager().await;
        remote.failing.store(true, Ordering::SeqCst);

        // The failing write still succeeds, against the local store
        manager.set("product:42", &phone(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Degraded);
        assert!(local.get("product:42").await.unwrap().is_some());
        let calls = remote.calls.load(Ordering::SeqCst);

        // Recovery of the remote does not bring it back
        remote.failing.store(false, Ordering::SeqCst);
        assert_eq!(manager.get::<Product>("product:42").await, Some(phone()));
        manager.delete("product:42").await;
        assert_eq!(remote.calls.load(Ordering::SeqCst), calls);
        assert!(!manager.is_remote_available());
    }

    #[tokio::test]
    async fn test_failed_read_falls_back_to_local() {
        let (manager, remote, local) = connected_manager().await;
        local
            .set("user:1", br#""from-local""#, None)
            .await
            .unwrap();
        remote.failing.store(true, Ordering::SeqCst);

        assert_eq!(manager.get::<String>("user:1").await, Some("from-local".to_string()));
        assert_eq!(manager.state(), ConnectionState::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_in_degraded_mode() {
        let manager = CacheManager::local_only(MemoryCache::new(TEST_MAX_ENTRIES));
        manager.initialize().await;

        manager.set("product:42", &phone(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(manager.get::<Product>("product:42").await, Some(phone()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(manager.get::<Product>("product:42").await, None);
    }

    #[tokio::test]
    async fn test_wrong_type_is_a_miss() {
        let (manager, _remote, _local) = connected_manager().await;
        manager.set("k", &"text", Duration::from_secs(5)).await.unwrap();

        assert_eq!(manager.get::<Product>("k").await, None);
    }

    #[tokio::test]
    async fn test_unserializable_value_is_an_error() {
        let (manager, remote, _local) = connected_manager().await;
        let mut value = BTreeMap::new();
        value.insert((1u8, 2u8), "tuple keys are not JSON object keys");

        let result = manager.set("k", &value, Duration::from_secs(5)).await;

        assert!(matches!(result, Err(CacheError::Serialization(_))));
        assert!(manager.is_remote_available());
        assert!(remote.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_switches_to_local() {
        let (manager, remote, _local) = connected_manager().await;
        manager.shutdown().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.set("k", &1u8, Duration::from_secs(5)).await.unwrap();
        assert_eq!(manager.get::<u8>("k").await, Some(1));
        assert!(remote.inner.is_empty().await);
    }
}
