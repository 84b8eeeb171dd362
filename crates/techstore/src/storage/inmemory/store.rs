//! In-memory backing store implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use techstore_core::storage::{BackingStore, Result, StoreError};

/// In-memory backing store.
///
/// Clones share the same data. Data is lost when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes every subsequent read fail until switched off.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent write fail until switched off.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of writes committed so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.data.read().await.contains_key(key)
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::read_failed(key, "store unavailable"));
        }
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::write_failed(key, "store unavailable"));
        }
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let store = InMemoryStore::new();

        store.write("product:1", b"phone").await.unwrap();

        assert_eq!(store.read("product:1").await.unwrap(), Some(b"phone".to_vec()));
        assert_eq!(store.read("product:2").await.unwrap(), None);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let store = InMemoryStore::new();
        let clone = store.clone();

        clone.write("k", b"v").await.unwrap();

        assert!(store.contains("k").await);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemoryStore::new();
        store.write("k", b"v").await.unwrap();

        store.fail_writes(true);
        assert!(matches!(
            store.write("k", b"w").await,
            Err(StoreError::WriteFailed { .. })
        ));

        store.fail_reads(true);
        assert!(matches!(
            store.read("k").await,
            Err(StoreError::ReadFailed { .. })
        ));

        store.fail_reads(false);
        assert_eq!(store.read("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.write_count(), 1);
    }
}
