//! Redis cache implementation.
//!
//! Pattern deletion walks the keyspace with SCAN so the server is never
//! blocked, then deletes the matches in one pipeline. TTLs are sent in
//! milliseconds (`SET PX`). Counters use INCR with a PEXPIRE set only by the
//! increment that creates the key. Existence
//! filters need the RedisBloom module (`BF.INSERT` / `BF.EXISTS`).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use techstore_core::cache::{Cache, CacheConnector, CounterStore, ExistenceFilter, Result};

use super::error::map_redis_error;
use crate::cache::memory::FilterConfig;

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 100;

/// Redis cache backend using connection manager for pooling.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
    filter_config: FilterConfig,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("conn", &"ConnectionManager")
            .field("filter_config", &self.filter_config)
            .finish()
    }
}

impl RedisCache {
    /// Creates a new Redis cache connection.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection cannot be established.
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;
        Ok(Self {
            conn,
            filter_config: FilterConfig::default(),
        })
    }

    /// Sets the capacity and error rate used when a filter is first created.
    pub fn with_filter_config(mut self, config: FilterConfig) -> Self {
        self.filter_config = config;
        self
    }

    async fn scan_matching(&self, pattern: &str) -> Result<BTreeSet<String>> {
        let mut conn = self.conn.clone();
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

            // SCAN may return a key more than once
            keys.extend(batch);

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        Ok(keys)
    }
}

/// Expiry in milliseconds. Redis rejects zero, so the floor is 1ms.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let result: Option<Vec<u8>> = conn.get(key).await.map_err(map_redis_error)?;
        Ok(result)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();

        match ttl {
            Some(duration) => {
                conn.pset_ex::<_, _, ()>(key, value, millis(duration))
                    .await
                    .map_err(map_redis_error)?;
            }
            None => {
                conn.set::<_, _, ()>(key, value)
                    .await
                    .map_err(map_redis_error)?;
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = self.scan_matching(pattern).await?.into_iter().collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.del(key);
        }

        let mut conn = self.conn.clone();
        let deleted: Vec<i64> = pipe.query_async(&mut conn).await.map_err(map_redis_error)?;

        // Keys that expired between SCAN and DEL report 0
        Ok(keys
            .into_iter()
            .zip(deleted)
            .filter(|(_, n)| *n > 0)
            .map(|(key, _)| key)
            .collect())
    }
}

#[async_trait]
impl CounterStore for RedisCache {
    async fn increment_window(&self, key: &str, window: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1u64).await.map_err(map_redis_error)?;

        if count == 1 {
            conn.pexpire::<_, ()>(key, millis(window) as i64)
                .await
                .map_err(map_redis_error)?;
        }

        Ok(count)
    }
}

#[async_trait]
impl ExistenceFilter for RedisCache {
    async fn filter_add(&self, filter: &str, item: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: Vec<bool> = redis::cmd("BF.INSERT")
            .arg(filter)
            .arg("CAPACITY")
            .arg(self.filter_config.capacity)
            .arg("ERROR")
            .arg(self.filter_config.false_positive_rate)
            .arg("ITEMS")
            .arg(item)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(added.first().copied().unwrap_or(false))
    }

    async fn filter_contains(&self, filter: &str, item: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("BF.EXISTS")
            .arg(filter)
            .arg(item)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(exists)
    }
}

/// Opens [`RedisCache`] connections for the cache manager.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    url: String,
}

impl RedisConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl CacheConnector for RedisConnector {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<Arc<dyn Cache>> {
        let cache = RedisCache::new(&self.url).await?;
        Ok(Arc::new(cache))
    }
}
