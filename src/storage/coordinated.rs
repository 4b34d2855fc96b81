//! # Coordinated Store
//!
//! Wraps a durable [`KeyValueStore`] with an in-memory read cache and
//! per-key write serialization. Two writers that each load-modify-store
//! the same collection would otherwise race and drop one change; the
//! [`CoordinatedStore::update_json`] primitive holds the key's lock across
//! the whole load-modify-store cycle so the second writer sees the first
//! writer's value. Writes to different keys proceed independently.
//!
//! The cache is only touched after the durable write succeeds, so a
//! failed write never leaves the cache ahead of durable state.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.2.0: `update_json` read-modify-write under the key lock
//! - 1.1.0: JSON helpers over serde_json
//! - 1.0.0: Initial release with cache + per-key write locks

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::kv::{KeyValueStore, StorageError};

/// Cached, write-serialized view over a durable key-value store
pub struct CoordinatedStore {
    durable: Arc<dyn KeyValueStore>,
    cache: DashMap<String, String>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CoordinatedStore {
    pub fn new(durable: Arc<dyn KeyValueStore>) -> Self {
        CoordinatedStore {
            durable,
            cache: DashMap::new(),
            key_locks: DashMap::new(),
        }
    }

    /// Lock handle for one key; created lazily, never removed
    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks.entry(key.to_string()).or_default().clone()
    }

    /// Read a value, preferring the cache over durable storage
    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if let Some(cached) = self.cache.get(key) {
            return Ok(Some(cached.value().clone()));
        }
        let value = self.durable.get(key).await?;
        if let Some(ref found) = value {
            // entry() so a racing set's fresher cache write is kept
            self.cache
                .entry(key.to_string())
                .or_insert_with(|| found.clone());
        }
        Ok(value)
    }

    /// Durably write a value; concurrent writes to the same key are ordered
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.durable.set(key, value).await?;
        self.cache.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Delete a value and invalidate its cache entry
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.durable.remove(key).await?;
        self.cache.remove(key);
        Ok(())
    }

    /// Typed read of a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key).await? {
            Some(raw) => {
                let decoded = serde_json::from_str(&raw).map_err(|source| StorageError::Decode {
                    key: key.to_string(),
                    source,
                })?;
                Ok(Some(decoded))
            }
            None => Ok(None),
        }
    }

    /// Typed write of a JSON value
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value).map_err(|source| StorageError::Decode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, &raw).await
    }

    /// Atomically load, transform and store a JSON value.
    ///
    /// The key's write lock is held across the entire cycle, so concurrent
    /// callers each observe the previous caller's result. `apply` receives
    /// `None` when the key has never been written.
    pub async fn update_json<T, F>(&self, key: &str, apply: F) -> Result<T, StorageError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let current = match self.cache.get(key).map(|entry| entry.value().clone()) {
            Some(raw) => Some(raw),
            None => self.durable.get(key).await?,
        };
        let decoded = match current {
            Some(raw) => {
                Some(serde_json::from_str(&raw).map_err(|source| StorageError::Decode {
                    key: key.to_string(),
                    source,
                })?)
            }
            None => None,
        };

        let updated = apply(decoded);
        let raw = serde_json::to_string(&updated).map_err(|source| StorageError::Decode {
            key: key.to_string(),
            source,
        })?;
        self.durable.set(key, &raw).await?;
        self.cache.insert(key.to_string(), raw);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryKeyValueStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store whose writes can be made to fail on demand
    struct FlakyStore {
        inner: MemoryKeyValueStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            FlakyStore {
                inner: MemoryKeyValueStore::new(),
                fail_writes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("disk full".to_string()));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key).await
        }
    }

    fn memory_store() -> CoordinatedStore {
        CoordinatedStore::new(Arc::new(MemoryKeyValueStore::new()))
    }

    #[tokio::test]
    async fn test_read_your_write() {
        let store = memory_store();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_updates_lose_nothing() {
        let store = Arc::new(memory_store());

        let mut handles = Vec::new();
        for writer in 0..2u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..50u32 {
                    store
                        .update_json::<Vec<u32>, _>("counters", |current| {
                            let mut values = current.unwrap_or_default();
                            values.push(writer * 1000 + i);
                            values
                        })
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let values: Vec<u32> = store.get_json("counters").await.unwrap().unwrap();
        assert_eq!(values.len(), 100, "every update must survive");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_consistent() {
        let flaky = Arc::new(FlakyStore::new());
        let store = CoordinatedStore::new(Arc::clone(&flaky) as Arc<dyn KeyValueStore>);

        store.set("k", "old").await.unwrap();

        flaky.fail_writes.store(true, Ordering::SeqCst);
        assert!(store.set("k", "new").await.is_err());

        // The cache must still serve the last durably written value.
        assert_eq!(store.get("k").await.unwrap(), Some("old".to_string()));
    }

    #[tokio::test]
    async fn test_update_json_starts_from_absent() {
        let store = memory_store();
        let result = store
            .update_json::<Vec<String>, _>("fresh", |current| {
                assert!(current.is_none());
                vec!["first".to_string()]
            })
            .await
            .unwrap();
        assert_eq!(result, vec!["first".to_string()]);
    }
}
