//! Durable key-value store boundary
//!
//! Opaque get/set/remove of string values. Implementations only promise
//! durability of individual operations; ordering and caching are the
//! coordinated layer's job.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Errors surfaced by the persistence layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying store failed to read or write
    #[error("storage backend failure: {0}")]
    Backend(String),
    /// A stored value could not be decoded into the expected shape
    #[error("failed to decode value for key `{key}`: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
}

/// Minimal durable key-value store
///
/// Values are opaque strings; serialization happens above this boundary.
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Durably store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete the value stored under `key`; absence is not an error
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set("k", "v1").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v1".to_string()));

        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v2".to_string()));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_remove_absent_is_ok() {
        let store = MemoryKeyValueStore::new();
        store.remove("never-set").await.unwrap();
    }
}
