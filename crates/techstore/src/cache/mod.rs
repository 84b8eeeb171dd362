//! Cache backends and the degrading cache manager.
//!
//! This module provides concrete implementations of the cache traits
//! defined in `techstore_core::cache`.
//!
//! # Feature Flags
//!
//! - `memory` (default): In-memory cache using tokio synchronization primitives.
//!   Always compiled, since degraded mode and the local tier need it.
//! - `redis`: Redis cache using the redis crate

mod manager;
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis_impl;

pub use manager::CacheManager;
pub use memory::{FilterConfig, MemoryCache};

#[cfg(feature = "redis")]
pub use redis_impl::{RedisCache, RedisConnector};
