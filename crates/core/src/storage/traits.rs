use async_trait::async_trait;

use super::Result;

/// The authoritative store behind the cache tiers.
///
/// Services expose their persistence through this narrow interface so the
/// cache coordinator can read through it on a miss and persist into it on
/// write-through and write-behind.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Reads the value stored under `key`.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `value` under `key`, replacing any previous value.
    async fn write(&self, key: &str, value: &[u8]) -> Result<()>;
}
