//! Resilient caching and event distribution for the techstore services.
//!
//! - [`cache`]: cache backends and the [`CacheManager`](cache::CacheManager),
//!   which falls back to an in-process cache when the remote store is down.
//! - [`coordinator`]: two-tier caching in front of a backing store.
//! - [`events`]: the event bus, producer and consumer.
//! - [`broker`]: broker implementations the event bus runs on.

pub mod broker;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod storage;
