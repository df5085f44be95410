//! # Key Store
//!
//! Persists one private key per identity in [`SecureStorage`].
//!
//! ## Storage Slots
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PRIVATE KEY SLOTS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  "{userId}_encrypted_private_key"   (passphrase-wrapped)               │
//! │  ───────────────────────────────                                        │
//! │  {                                                                     │
//! │    "encryptedKey": base64(AES-256-GCM(kek, iv, PKCS#8 DER) || tag),    │
//! │    "salt":         base64(16 random bytes),                            │
//! │    "iv":           base64(12 random bytes),                            │
//! │    "timestamp":    "2024-05-01T12:34:56.789Z",                         │
//! │    "iterations":   250000            (absent ⇒ 250000)                 │
//! │  }                                                                     │
//! │  kek = PBKDF2-HMAC-SHA256(passphrase, salt, iterations)                │
//! │                                                                         │
//! │  "{userId}_private_key"              (plaintext, legacy)               │
//! │  ──────────────────────                                                 │
//! │  base64(PKCS#8 DER)                                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one slot is populated per identity: every write clears the other.
//! When both are found (a crash between the two steps), the wrapped slot wins.
//!
//! ## Failure Classification
//!
//! Every way a wrapped record can fail to open (wrong passphrase, damaged
//! JSON, bad base64, failed tag, unparsable key) surfaces as the same
//! `DecryptionFailed`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::SecureStorage;
use crate::config::KeyProtection;
use crate::crypto::{codec, encryption, kdf, ContentKey, Nonce, PrivateKey, PublicKey};
use crate::error::{Error, Result};
use crate::identity::UserId;

fn plaintext_slot(user: &UserId) -> String {
    format!("{}_private_key", user)
}

fn wrapped_slot(user: &UserId) -> String {
    format!("{}_encrypted_private_key", user)
}

/// A passphrase-wrapped private key record, as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedPrivateKey {
    /// Base64 AES-GCM ciphertext of the PKCS#8 DER, tag appended
    pub encrypted_key: String,
    /// Base64 PBKDF2 salt
    pub salt: String,
    /// Base64 AES-GCM nonce
    pub iv: String,
    /// When the record was written
    pub timestamp: String,
    /// PBKDF2 iteration count; older records omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

impl WrappedPrivateKey {
    /// Wrap a private key under a passphrase
    pub fn seal(private_key: &PrivateKey, passphrase: &str, iterations: u32) -> Result<Self> {
        let salt = kdf::generate_salt();
        let kek = kdf::derive_key_encryption_key(passphrase, &salt, iterations);
        let nonce = Nonce::random();
        let der = private_key.to_der()?;

        let ciphertext = encryption::encrypt(&kek, &nonce, &der)?;

        Ok(Self {
            encrypted_key: codec::encode(ciphertext),
            salt: codec::encode(salt),
            iv: codec::encode(nonce.as_bytes()),
            timestamp: crate::time::now_iso8601(),
            iterations: Some(iterations),
        })
    }

    /// Unwrap with a passphrase
    pub fn open(&self, passphrase: &str) -> Result<PrivateKey> {
        self.try_open(passphrase).map_err(|_| Error::DecryptionFailed)
    }

    fn try_open(&self, passphrase: &str) -> Result<PrivateKey> {
        let iterations = self.iterations.unwrap_or(kdf::MIN_ITERATIONS);
        let iterations_valid = (1..=kdf::MAX_ITERATIONS).contains(&iterations);

        // A damaged record pays for the same derivation as a wrong passphrase
        let salt = codec::decode(&self.salt).unwrap_or_default();
        let kek: ContentKey = kdf::derive_key_encryption_key(
            passphrase,
            &salt,
            if iterations_valid { iterations } else { kdf::MIN_ITERATIONS },
        );

        if !iterations_valid || salt.len() != kdf::SALT_SIZE {
            return Err(Error::DecryptionFailed);
        }
        let nonce = Nonce::from_slice(&codec::decode(&self.iv)?).ok_or(Error::DecryptionFailed)?;
        let ciphertext = codec::decode(&self.encrypted_key)?;
        let der = Zeroizing::new(encryption::decrypt(&kek, &nonce, &ciphertext)?);

        PrivateKey::from_der(&der)
    }
}

/// Local store for identity private keys
pub struct KeyStore {
    storage: Arc<dyn SecureStorage>,
    iterations: u32,
    /// One write lock per identity
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyStore {
    /// Create a key store that wraps with the default iteration count
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self::with_iterations(storage, kdf::MIN_ITERATIONS)
    }

    /// Create a key store with an explicit PBKDF2 iteration count
    ///
    /// Only affects newly written records; existing records carry their own.
    pub fn with_iterations(storage: Arc<dyn SecureStorage>, iterations: u32) -> Self {
        Self {
            storage,
            iterations,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        // Entries nobody holds are dropped so the map tracks only active writers
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(user.as_str().to_string()).or_default().clone()
    }

    /// Store a private key, replacing whatever was stored for `user`
    ///
    /// With a passphrase the key is wrapped; without one it is stored as
    /// base64 PKCS#8. Writes for the same user are serialized.
    pub fn store(&self, user: &UserId, private_key: &PrivateKey, passphrase: Option<&str>) -> Result<()> {
        let lock = self.user_lock(user);
        let _guard = lock.lock();
        self.store_unlocked(user, private_key, passphrase)
    }

    fn store_unlocked(
        &self,
        user: &UserId,
        private_key: &PrivateKey,
        passphrase: Option<&str>,
    ) -> Result<()> {
        match passphrase {
            Some(passphrase) => {
                let record = WrappedPrivateKey::seal(private_key, passphrase, self.iterations)?;
                let json = serde_json::to_vec(&record)?;
                self.storage.set(&wrapped_slot(user), &json)?;
                self.storage.remove(&plaintext_slot(user))?;
                tracing::info!("Stored passphrase-wrapped private key for {}", user);
            }
            None => {
                let encoded = private_key.to_base64()?;
                self.storage.set(&plaintext_slot(user), encoded.as_bytes())?;
                self.storage.remove(&wrapped_slot(user))?;
                tracing::warn!("Stored private key for {} without passphrase protection", user);
            }
        }
        Ok(())
    }

    /// Load the private key for `user`
    ///
    /// ## Errors
    ///
    /// - `KeyNotFound` if nothing is stored
    /// - `PassphraseRequired` if the key is wrapped and no passphrase was given
    /// - `DecryptionFailed` if the wrapped record does not open, for any reason
    pub fn retrieve(&self, user: &UserId, passphrase: Option<&str>) -> Result<PrivateKey> {
        if let Some(record) = self.load_wrapped(user)? {
            let passphrase = passphrase.ok_or(Error::PassphraseRequired)?;
            tracing::debug!("Unwrapping private key for {}", user);
            return record.open(passphrase);
        }

        match self.storage.get(&plaintext_slot(user))? {
            Some(bytes) => {
                if passphrase.is_some() {
                    tracing::warn!("Private key for {} is stored without a passphrase", user);
                }
                let text = std::str::from_utf8(&bytes)
                    .map_err(|_| Error::InvalidKeyMaterial("Stored key is not text".into()))?;
                PrivateKey::from_base64(text)
            }
            None => Err(Error::KeyNotFound(user.to_string())),
        }
    }

    /// The wrapped record for `user`, if that slot is populated
    ///
    /// A record that is not valid JSON is reported as `DecryptionFailed`.
    pub fn load_wrapped(&self, user: &UserId) -> Result<Option<WrappedPrivateKey>> {
        match self.storage.get(&wrapped_slot(user))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|_| Error::DecryptionFailed),
            None => Ok(None),
        }
    }

    /// Which protection the stored key uses, if any key is stored
    pub fn protection(&self, user: &UserId) -> Result<Option<KeyProtection>> {
        if self.storage.contains(&wrapped_slot(user))? {
            Ok(Some(KeyProtection::Passphrase))
        } else if self.storage.contains(&plaintext_slot(user))? {
            Ok(Some(KeyProtection::Plaintext))
        } else {
            Ok(None)
        }
    }

    /// Check if a private key is stored for `user`
    pub fn exists(&self, user: &UserId) -> Result<bool> {
        Ok(self.protection(user)?.is_some())
    }

    /// Remove every stored key for `user`; returns whether anything existed
    pub fn delete(&self, user: &UserId) -> Result<bool> {
        let lock = self.user_lock(user);
        let _guard = lock.lock();

        let wrapped = self.storage.remove(&wrapped_slot(user))?;
        let plaintext = self.storage.remove(&plaintext_slot(user))?;

        if wrapped || plaintext {
            tracing::info!("Deleted private key for {}", user);
        }
        Ok(wrapped || plaintext)
    }

    /// Derive the public key from the stored private key
    pub fn public_key(&self, user: &UserId, passphrase: Option<&str>) -> Result<PublicKey> {
        Ok(self.retrieve(user, passphrase)?.public_key())
    }

    /// Re-store a plaintext key wrapped under `passphrase`
    ///
    /// Returns `false` when the key is already wrapped.
    pub fn migrate_to_passphrase(&self, user: &UserId, passphrase: &str) -> Result<bool> {
        let lock = self.user_lock(user);
        let _guard = lock.lock();

        if self.storage.contains(&wrapped_slot(user))? {
            return Ok(false);
        }

        let bytes = self
            .storage
            .get(&plaintext_slot(user))?
            .ok_or_else(|| Error::KeyNotFound(user.to_string()))?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| Error::InvalidKeyMaterial("Stored key is not text".into()))?;
        let private_key = PrivateKey::from_base64(text)?;

        self.store_unlocked(user, &private_key, Some(passphrase))?;
        tracing::info!("Migrated private key for {} to passphrase protection", user);
        Ok(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================
