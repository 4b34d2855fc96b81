//! SQLite-backed durable store
//!
//! Single `kv` table with `INSERT OR REPLACE` write semantics. The
//! connection sits behind an async mutex so the store can be shared
//! freely; individual operations are short enough that holding the lock
//! across them is fine.

use async_trait::async_trait;
use log::debug;
use sqlite::{Connection, State};
use std::path::Path;
use tokio::sync::Mutex;

use super::kv::{KeyValueStore, StorageError};

/// Durable key-value store persisted in a SQLite database file
pub struct SqliteKeyValueStore {
    connection: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    /// Open (or create) the database at `path` and ensure the kv table exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let connection = sqlite::open(path.as_ref()).map_err(db_err)?;
        connection
            .execute("CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .map_err(db_err)?;
        debug!("Opened kv store at {}", path.as_ref().display());
        Ok(SqliteKeyValueStore {
            connection: Mutex::new(connection),
        })
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let connection = self.connection.lock().await;
        let mut statement = connection
            .prepare("SELECT value FROM kv WHERE key = ?")
            .map_err(db_err)?;
        statement.bind((1, key)).map_err(db_err)?;
        match statement.next().map_err(db_err)? {
            State::Row => Ok(Some(statement.read::<String, _>(0).map_err(db_err)?)),
            State::Done => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let connection = self.connection.lock().await;
        let mut statement = connection
            .prepare("INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)")
            .map_err(db_err)?;
        statement.bind((1, key)).map_err(db_err)?;
        statement.bind((2, value)).map_err(db_err)?;
        while statement.next().map_err(db_err)? != State::Done {}
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let connection = self.connection.lock().await;
        let mut statement = connection
            .prepare("DELETE FROM kv WHERE key = ?")
            .map_err(db_err)?;
        statement.bind((1, key)).map_err(db_err)?;
        while statement.next().map_err(db_err)? != State::Done {}
        Ok(())
    }
}

fn db_err(err: sqlite::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKeyValueStore::open(dir.path().join("kv.sqlite")).unwrap();

        assert_eq!(store.get("reminders").await.unwrap(), None);
        store.set("reminders", "[]").await.unwrap();
        assert_eq!(store.get("reminders").await.unwrap(), Some("[]".to_string()));

        store.set("reminders", "[1]").await.unwrap();
        assert_eq!(
            store.get("reminders").await.unwrap(),
            Some("[1]".to_string())
        );

        store.remove("reminders").await.unwrap();
        assert_eq!(store.get("reminders").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.sqlite");

        {
            let store = SqliteKeyValueStore::open(&path).unwrap();
            store.set("scheduled_triggers", "{}").await.unwrap();
        }

        let reopened = SqliteKeyValueStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("scheduled_triggers").await.unwrap(),
            Some("{}".to_string())
        );
    }
}
