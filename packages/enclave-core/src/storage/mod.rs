//! # Storage Module
//!
//! Device-local storage for private key material.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE LAYERS                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  KeyStore                                                       │   │
//! │  │  • wraps / unwraps private keys                                 │   │
//! │  │  • slot naming per user                                         │   │
//! │  │  • per-user write serialization                                 │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 │                                       │
//! │                                 ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SecureStorage trait: get / set / remove                        │   │
//! │  └──────────────┬─────────────────────────────────┬────────────────┘   │
//! │                 ▼                                 ▼                     │
//! │  ┌───────────────────────────┐   ┌───────────────────────────────┐     │
//! │  │  MemoryStorage            │   │  SqliteStorage                │     │
//! │  │  tests, ephemeral         │   │  durable across restarts      │     │
//! │  └───────────────────────────┘   └───────────────────────────────┘     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Platform keychains plug in by implementing [`SecureStorage`].

pub mod key_store;

pub use key_store::{KeyStore, WrappedPrivateKey};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Device-scoped key/value storage
///
/// Implementations must be durable for the lifetime the caller expects
/// (process or device) and safe to share between threads.
pub trait SecureStorage: Send + Sync {
    /// Read a value; `None` if the key is absent
    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value; returns whether it existed
    fn remove(&self, key: &str) -> Result<bool>;

    /// Check if a key exists
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Process-lifetime storage (development and testing)
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }
}

// ============================================================================
// SQLITE
// ============================================================================

const CREATE_SECURE_ITEMS: &str = "
    CREATE TABLE IF NOT EXISTS secure_items (
        key TEXT PRIMARY KEY NOT NULL,
        value BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    );
";

/// Durable storage in a SQLite database file
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            Error::StorageReadError(format!("Failed to open key storage: {}", e))
        })?;
        Self::with_connection(conn)
    }

    /// Create a database that lives only as long as this handle
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::StorageReadError(format!("Failed to create in-memory key storage: {}", e))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_SECURE_ITEMS)
            .map_err(|e| Error::StorageWriteError(format!("Failed to create tables: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl SecureStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT value FROM secure_items WHERE key = ?",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        );

        match result {
            Ok(value) => Ok(Some(Zeroizing::new(value))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::StorageReadError(format!("Failed to read {}: {}", key, e))),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO secure_items (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, crate::time::now_timestamp_millis()],
        )
        .map_err(|e| Error::StorageWriteError(format!("Failed to write {}: {}", key, e)))?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();

        let rows = conn
            .execute("DELETE FROM secure_items WHERE key = ?", params![key])
            .map_err(|e| Error::StorageWriteError(format!("Failed to delete {}: {}", key, e)))?;

        Ok(rows > 0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn SecureStorage) {
        assert!(storage.get("alice_private_key").unwrap().is_none());
        assert!(!storage.contains("alice_private_key").unwrap());

        storage.set("alice_private_key", b"first").unwrap();
        assert_eq!(&**storage.get("alice_private_key").unwrap().unwrap(), b"first");
        assert!(storage.contains("alice_private_key").unwrap());

        storage.set("alice_private_key", b"second").unwrap();
        assert_eq!(&**storage.get("alice_private_key").unwrap().unwrap(), b"second");

        assert!(storage.remove("alice_private_key").unwrap());
        assert!(!storage.remove("alice_private_key").unwrap());
        assert!(storage.get("alice_private_key").unwrap().is_none());
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_sqlite_storage_in_memory() {
        exercise(&SqliteStorage::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.set("bob_encrypted_private_key", b"{\"v\":1}").unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(
            &**storage.get("bob_encrypted_private_key").unwrap().unwrap(),
            b"{\"v\":1}"
        );
    }

    #[test]
    fn test_sqlite_write_failures_are_write_errors() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage.set("alice_private_key", b"kept").unwrap();

        storage.conn.lock().execute_batch("PRAGMA query_only = ON").unwrap();

        assert!(matches!(
            storage.set("alice_private_key", b"lost"),
            Err(Error::StorageWriteError(_))
        ));
        assert!(matches!(
            storage.remove("alice_private_key"),
            Err(Error::StorageWriteError(_))
        ));
        assert_eq!(&**storage.get("alice_private_key").unwrap().unwrap(), b"kept");
    }

    #[test]
    fn test_keys_are_independent() {
        let storage = MemoryStorage::new();
        storage.set("a", b"1").unwrap();
        storage.set("b", b"2").unwrap();
        storage.remove("a").unwrap();
        assert_eq!(&**storage.get("b").unwrap().unwrap(), b"2");
    }
}
