//! Redis cache backend implementation.
//!
//! Provides the distributed tier for multi-instance deployments: TTL
//! values, SCAN-based pattern deletion, windowed counters and RedisBloom
//! existence filters.

mod cache;
mod error;

pub use cache::{RedisCache, RedisConnector};
pub(crate) use error::map_redis_error;
