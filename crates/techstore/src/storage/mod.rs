//! Backing store implementations.
//!
//! The coordinator treats whatever implements
//! `techstore_core::storage::BackingStore` as the authoritative source of
//! truth. Services plug in their database; the in-memory store here backs
//! tests and the relay binary.

pub mod inmemory;

pub use inmemory::InMemoryStore;
