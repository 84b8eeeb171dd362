//! Message broker backends.
//!
//! - `memory` (always compiled): per-topic append logs inside the process
//! - `redis`: Redis Streams with consumer groups

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use memory::MemoryBroker;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBroker;
