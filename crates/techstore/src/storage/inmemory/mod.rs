//! In-memory backing store for testing.
//!
//! Stores values in a HashMap wrapped in `Arc<RwLock<_>>`. Reads and writes
//! can be made to fail on demand to exercise store-failure paths.
//!
//! # Example
//!
//! ```rust,ignore
//! use techstore::storage::InMemoryStore;
//!
//! let store = InMemoryStore::new();
//! store.fail_writes(true);
//! ```

mod store;

pub use store::InMemoryStore;
