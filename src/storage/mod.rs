//! # Storage Module
//!
//! Durable key-value persistence and the coordination layer on top of it.
//!
//! The durable primitive is deliberately tiny: opaque string values by
//! string key, no transactions. Everything the rest of the crate needs
//! (read-your-write caching, per-key write ordering, lost-update-safe
//! read-modify-write) lives in [`CoordinatedStore`].
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.2.0: `update` primitive holds the key lock across load-modify-store
//! - 1.1.0: SQLite-backed store
//! - 1.0.0: Initial release with trait + in-memory store

pub mod coordinated;
pub mod kv;
pub mod sqlite;

pub use coordinated::CoordinatedStore;
pub use kv::{KeyValueStore, MemoryKeyValueStore, StorageError};
pub use sqlite::SqliteKeyValueStore;
