//! In-memory cache backend implementation.
//!
//! Provides a thread-safe in-memory cache with TTL support, windowed
//! counters and Bloom-filter existence checks for single-instance
//! deployments and for the local tier.

mod cache;
mod filter;

pub use cache::MemoryCache;
pub use filter::{BloomFilter, FilterConfig};
