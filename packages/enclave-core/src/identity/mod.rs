//! # Identity Module
//!
//! User ids and the lifecycle of each identity's key pair.
//!
//! ## Provisioning Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      KEY PAIR PROVISIONING                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  initialize_keys(user, passphrase?)                                    │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  ┌──────────────┐   yes                                                 │
//! │  │ key stored?  │──────► Existing (nothing written)                     │
//! │  └──────┬───────┘                                                       │
//! │         │ no                                                            │
//! │         ▼                                                               │
//! │  ┌──────────────────────┐                                               │
//! │  │ generate RSA pair    │  blocking pool; dropping the future          │
//! │  │                      │  discards the pair, nothing is stored        │
//! │  └──────┬───────────────┘                                               │
//! │         ▼                                                               │
//! │  ┌──────────────────────┐                                               │
//! │  │ KeyStore::store      │  private key, wrapped if passphrase given    │
//! │  └──────┬───────────────┘                                               │
//! │         ▼                                                               │
//! │  ┌──────────────────────┐   fails                                       │
//! │  │ directory upsert     │──────► DirectoryUnavailable                   │
//! │  └──────┬───────────────┘        (key stays stored; caller retries     │
//! │         │                         with republish_public_key)           │
//! │         ▼                                                               │
//! │  Created(entry)                                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Regeneration follows the same path without the existence check. It makes
//! every ciphertext addressed to the previous public key unreadable.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{KeyPair, PrivateKey, PublicKey};
use crate::directory::{DirectoryEntry, KeyDirectoryClient};
use crate::error::{Error, Result};
use crate::storage::KeyStore;

/// Opaque, stable identifier of a user account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an id from the auth layer
    ///
    /// An empty or blank id means there is no identity context.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::NotAuthenticated);
        }
        Ok(Self(id))
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of [`KeyPairService::initialize_keys`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioning {
    /// A key was already stored; nothing changed
    Existing,
    /// A new pair was generated, stored and published
    Created(DirectoryEntry),
}

/// Generates, stores and publishes identity key pairs
pub struct KeyPairService {
    key_bits: usize,
    key_store: Arc<KeyStore>,
    directory: Arc<dyn KeyDirectoryClient>,
    /// Serializes provisioning, regeneration and deletion
    provisioning: tokio::sync::Mutex<()>,
}

impl KeyPairService {
    /// Create a service generating `key_bits`-bit RSA pairs
    pub fn new(
        key_bits: usize,
        key_store: Arc<KeyStore>,
        directory: Arc<dyn KeyDirectoryClient>,
    ) -> Self {
        Self {
            key_bits,
            key_store,
            directory,
            provisioning: tokio::sync::Mutex::new(()),
        }
    }

    /// The key store this service writes to
    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    /// Generate a fresh pair on the blocking pool
    pub async fn generate_key_pair(&self) -> Result<KeyPair> {
        let bits = self.key_bits;
        tracing::debug!("Generating {}-bit RSA key pair", bits);
        tokio::task::spawn_blocking(move || KeyPair::generate(bits)).await?
    }

    /// Provision keys for `user` unless a key is already stored
    pub async fn initialize_keys(
        &self,
        user: &UserId,
        passphrase: Option<&str>,
    ) -> Result<Provisioning> {
        let _guard = self.provisioning.lock().await;

        if self.key_store.exists(user)? {
            tracing::info!("Keys already provisioned for {}", user);
            return Ok(Provisioning::Existing);
        }

        let entry = self.replace_key_pair(user, passphrase).await?;
        tracing::info!("Provisioned key pair {} for {}", entry.key_id, user);
        Ok(Provisioning::Created(entry))
    }

    /// Replace the key pair for `user` unconditionally
    ///
    /// Ciphertexts addressed to the previous public key can no longer be
    /// decrypted. Confirmation is the caller's job.
    pub async fn regenerate_key_pair(
        &self,
        user: &UserId,
        passphrase: Option<&str>,
    ) -> Result<DirectoryEntry> {
        let _guard = self.provisioning.lock().await;

        let entry = self.replace_key_pair(user, passphrase).await?;
        tracing::info!("Regenerated key pair for {}, new key {}", user, entry.key_id);
        Ok(entry)
    }

    /// Publish the public half of the stored key again
    ///
    /// The retry path after `initialize_keys` or `regenerate_key_pair`
    /// reported `DirectoryUnavailable`.
    pub async fn republish_public_key(
        &self,
        user: &UserId,
        passphrase: Option<&str>,
    ) -> Result<DirectoryEntry> {
        let private = self.load_private_key(user, passphrase).await?;
        self.publish(user, &private.public_key()).await
    }

    /// Delete the stored private key for `user`
    pub async fn delete_keys(&self, user: &UserId) -> Result<bool> {
        let _guard = self.provisioning.lock().await;
        self.key_store.delete(user)
    }

    /// Load the stored private key on the blocking pool
    pub async fn load_private_key(
        &self,
        user: &UserId,
        passphrase: Option<&str>,
    ) -> Result<PrivateKey> {
        let key_store = self.key_store.clone();
        let user = user.clone();
        let passphrase = passphrase.map(|p| Zeroizing::new(p.to_string()));

        tokio::task::spawn_blocking(move || {
            key_store.retrieve(&user, passphrase.as_deref().map(|p| p.as_str()))
        })
        .await?
    }

    async fn replace_key_pair(
        &self,
        user: &UserId,
        passphrase: Option<&str>,
    ) -> Result<DirectoryEntry> {
        let KeyPair { public, private } = self.generate_key_pair().await?;

        let key_store = self.key_store.clone();
        let owner = user.clone();
        let passphrase = passphrase.map(|p| Zeroizing::new(p.to_string()));
        tokio::task::spawn_blocking(move || {
            key_store.store(&owner, &private, passphrase.as_deref().map(|p| p.as_str()))
        })
        .await??;

        self.publish(user, &public).await
    }

    async fn publish(&self, user: &UserId, public: &PublicKey) -> Result<DirectoryEntry> {
        let entry = DirectoryEntry::new(user.clone(), public)?;

        if let Err(e) = self.directory.upsert_public_key(&entry).await {
            tracing::warn!("Failed to publish public key for {}: {}", user, e);
            return Err(Error::DirectoryUnavailable(e.to_string()));
        }

        tracing::info!("Published public key {} for {}", entry.key_id, user);
        Ok(entry)
    }
}

// ============================================================================
// TESTS
// ============================================================================
