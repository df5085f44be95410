//! # Key Directory
//!
//! The directory maps a user id to that user's current public key. It is an
//! external collaborator (a remote table in production); the core only sees
//! the [`KeyDirectoryClient`] trait.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY DIRECTORY                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   Owner (alice)                             Peer (bob)                  │
//! │   ─────────────                             ──────────                  │
//! │   upsert_public_key(entry) ──►  ┌─────────────────────┐                 │
//! │                                 │  user_keys          │                 │
//! │                                 │  ─────────          │                 │
//! │                                 │  user_id (PK)       │                 │
//! │                                 │  public_key         │                 │
//! │                                 │  key_id             │                 │
//! │                                 │  created_at         │                 │
//! │                                 └─────────────────────┘                 │
//! │                                    ◄── get_public_key("alice")          │
//! │                                                                         │
//! │   One row per user. Upsert replaces the previous key.                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Network timeouts belong to the implementation, not to the core.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::error::{Error, Result};
use crate::identity::UserId;

/// One published public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Owner of the key
    pub user_id: UserId,
    /// Base64 SPKI DER
    pub public_key: String,
    /// Fingerprint of `public_key`
    pub key_id: String,
    /// When the key was published (ISO 8601)
    pub created_at: String,
}

impl DirectoryEntry {
    /// Build an entry for `user` publishing `key` now
    pub fn new(user: UserId, key: &PublicKey) -> Result<Self> {
        Ok(Self {
            user_id: user,
            public_key: key.to_base64()?,
            key_id: key.key_id()?,
            created_at: crate::time::now_iso8601(),
        })
    }

    /// Import the published key
    pub fn parse_key(&self) -> Result<PublicKey> {
        PublicKey::from_base64(&self.public_key)
    }
}

/// Errors reported by a directory implementation
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// No key is published for the user
    #[error("No public key published")]
    NotFound,
    /// The directory could not be reached or refused the request
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

impl DirectoryError {
    /// Map to the core taxonomy for a lookup of `user`
    pub fn for_lookup(self, user: &UserId) -> Error {
        match self {
            DirectoryError::NotFound => Error::RecipientKeyUnavailable(user.to_string()),
            DirectoryError::Unavailable(reason) => Error::DirectoryUnavailable(reason),
        }
    }
}

impl From<DirectoryError> for Error {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => Error::RecipientKeyUnavailable(err.to_string()),
            DirectoryError::Unavailable(reason) => Error::DirectoryUnavailable(reason),
        }
    }
}

/// Publish and fetch public keys by user id
#[async_trait]
pub trait KeyDirectoryClient: Send + Sync {
    /// Publish `entry`, replacing any key already published for its user
    async fn upsert_public_key(&self, entry: &DirectoryEntry) -> std::result::Result<(), DirectoryError>;

    /// Fetch the current key for `user`
    async fn get_public_key(&self, user: &UserId) -> std::result::Result<DirectoryEntry, DirectoryError>;
}

// ============================================================================
// IN-MEMORY DIRECTORY
// ============================================================================

/// A directory held in process memory
///
/// Can be switched offline to simulate an unreachable remote.
#[derive(Default)]
pub struct InMemoryDirectory {
    entries: RwLock<HashMap<UserId, DirectoryEntry>>,
    offline: AtomicBool,
}

impl InMemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `Unavailable` until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of published keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is published
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_online(&self) -> std::result::Result<(), DirectoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("directory is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyDirectoryClient for InMemoryDirectory {
    async fn upsert_public_key(&self, entry: &DirectoryEntry) -> std::result::Result<(), DirectoryError> {
        self.check_online()?;
        self.entries
            .write()
            .insert(entry.user_id.clone(), entry.clone());
        Ok(())
    }

    async fn get_public_key(&self, user: &UserId) -> std::result::Result<DirectoryEntry, DirectoryError> {
        self.check_online()?;
        self.entries
            .read()
            .get(user)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }
}

// ============================================================================
// SQLITE DIRECTORY
// ============================================================================

const CREATE_USER_KEYS: &str = "
    CREATE TABLE IF NOT EXISTS user_keys (
        user_id TEXT PRIMARY KEY NOT NULL,
        public_key TEXT NOT NULL,
        key_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
";

/// A directory in a local SQLite database
///
/// Lets several identities on one machine exchange keys without a server.
pub struct SqliteDirectory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDirectory {
    /// Open or create the directory database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            Error::DirectoryUnavailable(format!("Failed to open directory: {}", e))
        })?;
        Self::with_connection(conn)
    }

    /// Create a directory that lives only as long as this handle
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::DirectoryUnavailable(format!("Failed to create directory: {}", e))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_USER_KEYS).map_err(|e| {
            Error::DirectoryUnavailable(format!("Failed to create tables: {}", e))
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl KeyDirectoryClient for SqliteDirectory {
    async fn upsert_public_key(&self, entry: &DirectoryEntry) -> std::result::Result<(), DirectoryError> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO user_keys (user_id, public_key, key_id, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                public_key = excluded.public_key,
                key_id = excluded.key_id,
                created_at = excluded.created_at",
            params![
                entry.user_id.as_str(),
                entry.public_key,
                entry.key_id,
                entry.created_at
            ],
        )
        .map_err(|e| DirectoryError::Unavailable(format!("Failed to upsert key: {}", e)))?;

        Ok(())
    }

    async fn get_public_key(&self, user: &UserId) -> std::result::Result<DirectoryEntry, DirectoryError> {
        let conn = self.conn.lock();

        let result = conn.query_row(
            "SELECT public_key, key_id, created_at FROM user_keys WHERE user_id = ?",
            params![user.as_str()],
            |row| {
                Ok(DirectoryEntry {
                    user_id: user.clone(),
                    public_key: row.get(0)?,
                    key_id: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        );

        match result {
            Ok(entry) => Ok(entry),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(DirectoryError::NotFound),
            Err(e) => Err(DirectoryError::Unavailable(format!("Failed to get key: {}", e))),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ALICE, BOB};

    fn entry(user: &str, public_key: &str) -> DirectoryEntry {
        let key = PublicKey::from_base64(public_key).unwrap();
        DirectoryEntry::new(UserId::new(user).unwrap(), &key).unwrap()
    }

    async fn exercise(directory: &dyn KeyDirectoryClient) {
        let alice = UserId::new("alice").unwrap();

        assert!(matches!(
            directory.get_public_key(&alice).await,
            Err(DirectoryError::NotFound)
        ));

        let first = entry("alice", &ALICE.public_key);
        directory.upsert_public_key(&first).await.unwrap();
        assert_eq!(directory.get_public_key(&alice).await.unwrap(), first);

        let second = entry("alice", &BOB.public_key);
        directory.upsert_public_key(&second).await.unwrap();
        let fetched = directory.get_public_key(&alice).await.unwrap();
        assert_eq!(fetched.public_key, BOB.public_key);
        assert_eq!(fetched.key_id, second.key_id);
    }

    #[tokio::test]
    async fn test_in_memory_directory() {
        let directory = InMemoryDirectory::new();
        exercise(&directory).await;
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_directory() {
        exercise(&SqliteDirectory::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_offline_directory() {
        let directory = InMemoryDirectory::new();
        directory.set_offline(true);

        let err = directory
            .upsert_public_key(&entry("alice", &ALICE.public_key))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Unavailable(_)));
        assert!(directory.is_empty());
    }

    #[test]
    fn test_error_mapping() {
        let bob = UserId::new("bob").unwrap();
        assert!(matches!(
            DirectoryError::NotFound.for_lookup(&bob),
            Error::RecipientKeyUnavailable(_)
        ));
        assert!(matches!(
            DirectoryError::Unavailable("timeout".into()).for_lookup(&bob),
            Error::DirectoryUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_error_conversion_through_question_mark() {
        async fn lookup(directory: &InMemoryDirectory, user: &UserId) -> Result<DirectoryEntry> {
            Ok(directory.get_public_key(user).await?)
        }

        let directory = InMemoryDirectory::new();
        let nobody = UserId::new("nobody").unwrap();

        let missing = lookup(&directory, &nobody).await.unwrap_err();
        assert!(matches!(missing, Error::RecipientKeyUnavailable(_)));
        assert!(!missing.is_recoverable());

        directory.set_offline(true);
        let offline = lookup(&directory, &nobody).await.unwrap_err();
        assert!(matches!(offline, Error::DirectoryUnavailable(_)));
        assert!(offline.is_recoverable());
    }

    #[test]
    fn test_entry_json_shape() {
        let json = serde_json::to_value(entry("alice", &ALICE.public_key)).unwrap();
        assert_eq!(json["userId"], "alice");
        assert_eq!(json["publicKey"], ALICE.public_key.as_str());
        assert_eq!(json["keyId"].as_str().unwrap().len(), 32);
        assert!(json["createdAt"].is_string());
    }
}
