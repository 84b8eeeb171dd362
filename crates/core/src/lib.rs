//! techstore_core - types and traits shared by the techstore services.
//!
//! Everything in this crate is free of I/O. Concrete cache backends, brokers
//! and the coordinators that drive them live in the `techstore` crate.

pub mod cache;
pub mod connection;
pub mod events;
pub mod storage;
