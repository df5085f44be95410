//! # Enclave Core
//!
//! End-to-end encryption core for a messaging client: identity key pairs,
//! private keys at rest, message encryption and hybrid file encryption.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ENCLAVE CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  EnclaveCore (session, config, async surface)                    │  │
//! │  └───────┬──────────────────┬──────────────────┬────────────────────┘  │
//! │          │                  │                  │                        │
//! │  ┌───────▼───────┐  ┌───────▼───────┐  ┌───────▼───────┐               │
//! │  │   Identity    │  │   Messaging   │  │  Files        │               │
//! │  │               │  │               │  │               │               │
//! │  │ - UserId      │  │ - RSA-OAEP    │  │ - AES-GCM     │               │
//! │  │ - provision   │  │   per message │  │ - wrapped     │               │
//! │  │ - regenerate  │  │               │  │   content key │               │
//! │  └───┬───────┬───┘  └───────┬───────┘  └───────┬───────┘               │
//! │      │       │              │                  │                        │
//! │      │       └──────────────┴─────────┬────────┘                        │
//! │      │                                │                                 │
//! │  ┌───▼──────────────┐   ┌─────────────▼────────────┐                    │
//! │  │   Directory      │   │   Storage                │                    │
//! │  │                  │   │                          │                    │
//! │  │ - user → pubkey  │   │ - KeyStore (PBKDF2 wrap) │                    │
//! │  │ - remote (trait) │   │ - SecureStorage (trait)  │                    │
//! │  └──────────────────┘   └──────────────────────────┘                    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  Crypto: RSA-OAEP-SHA256 · AES-256-GCM · PBKDF2 · base64          │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error taxonomy for the whole library
//! - [`config`] - Deployment configuration
//! - [`crypto`] - Primitives (RSA keys, AES-GCM, PBKDF2, base64)
//! - [`storage`] - Local secure storage and the private key store
//! - [`directory`] - Public key directory collaborator
//! - [`identity`] - User ids and key pair lifecycle
//! - [`messaging`] - Message and file ciphers
//!
//! ## Dependency Injection
//!
//! Nothing is global. Storage and the directory are handed to
//! [`EnclaveCore::new`], so every instance is independently testable.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod identity;
pub mod messaging;
pub mod storage;
/// Timestamp helpers.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{CoreConfig, KeyProtection};
pub use directory::{DirectoryEntry, DirectoryError, KeyDirectoryClient};
pub use error::{Error, Result};
pub use identity::{KeyPairService, Provisioning, UserId};
pub use messaging::{DecryptedFile, EncryptedFilePackage, FileCipher, FileMetadata, MessageCipher};
pub use storage::{KeyStore, SecureStorage};

// ============================================================================
// CORE INSTANCE
// ============================================================================

use parking_lot::RwLock;
use std::sync::Arc;
use zeroize::Zeroizing;

/// The main Enclave Core instance that coordinates all modules
///
/// ## Lifecycle
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                       ENCLAVE CORE LIFECYCLE                            │
/// ├─────────────────────────────────────────────────────────────────────────┤
/// │                                                                         │
/// │  1. EnclaveCore::new(config, storage, directory)                       │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  2. sign_in(user_id)          ◄── from the auth layer                   │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  3. initialize_keys(passphrase?)   first run: generate + publish        │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  4. encrypt_* / decrypt_*                                              │
/// │            │                                                           │
/// │            ▼                                                           │
/// │  5. sign_out()                 operations fail with NotAuthenticated   │
/// │                                                                         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
///
/// In a `passphrase` deployment every operation that touches the private key
/// requires a passphrase. In a `plaintext` deployment new keys are stored
/// unwrapped and a supplied passphrase only serves to read legacy wrapped keys.
pub struct EnclaveCore {
    config: CoreConfig,
    directory: Arc<dyn KeyDirectoryClient>,
    keys: KeyPairService,
    messages: MessageCipher,
    files: FileCipher,
    session: RwLock<Option<UserId>>,
}

impl EnclaveCore {
    /// Create a core over the given collaborators
    pub fn new(
        config: CoreConfig,
        storage: Arc<dyn SecureStorage>,
        directory: Arc<dyn KeyDirectoryClient>,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!("Initializing Enclave Core v{}", env!("CARGO_PKG_VERSION"));

        let key_store = Arc::new(KeyStore::with_iterations(storage, config.pbkdf2_iterations));

        Ok(Self {
            keys: KeyPairService::new(config.rsa_key_bits, key_store.clone(), directory.clone()),
            messages: MessageCipher::new(key_store.clone()),
            files: FileCipher::new(key_store),
            directory,
            config,
            session: RwLock::new(None),
        })
    }

    /// The validated configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The key store shared by all services
    pub fn key_store(&self) -> &Arc<KeyStore> {
        self.keys.key_store()
    }

    // ── Session ──────────────────────────────────────────────────────────

    /// Set the identity context
    pub fn sign_in(&self, user_id: &str) -> Result<UserId> {
        let user = UserId::new(user_id)?;
        *self.session.write() = Some(user.clone());
        tracing::info!("Signed in as {}", user);
        Ok(user)
    }

    /// Clear the identity context
    pub fn sign_out(&self) {
        if let Some(user) = self.session.write().take() {
            tracing::info!("Signed out {}", user);
        }
    }

    /// The signed-in user
    pub fn current_user(&self) -> Result<UserId> {
        self.session.read().clone().ok_or(Error::NotAuthenticated)
    }

    /// Passphrase to use when writing a key
    fn write_passphrase<'a>(&self, passphrase: Option<&'a str>) -> Result<Option<&'a str>> {
        match self.config.key_protection {
            KeyProtection::Passphrase => passphrase.map(Some).ok_or(Error::PassphraseRequired),
            KeyProtection::Plaintext => Ok(None),
        }
    }

    /// Passphrase to use when reading a key
    fn read_passphrase<'a>(&self, passphrase: Option<&'a str>) -> Result<Option<&'a str>> {
        if self.config.requires_passphrase() && passphrase.is_none() {
            return Err(Error::PassphraseRequired);
        }
        Ok(passphrase)
    }

    // ── Keys ─────────────────────────────────────────────────────────────

    /// Provision keys for the signed-in user unless already present
    pub async fn initialize_keys(&self, passphrase: Option<&str>) -> Result<Provisioning> {
        let user = self.current_user()?;
        let passphrase = self.write_passphrase(passphrase)?;
        self.keys.initialize_keys(&user, passphrase).await
    }

    /// Replace the signed-in user's key pair
    pub async fn regenerate_key_pair(&self, passphrase: Option<&str>) -> Result<DirectoryEntry> {
        let user = self.current_user()?;
        let passphrase = self.write_passphrase(passphrase)?;
        self.keys.regenerate_key_pair(&user, passphrase).await
    }

    /// Publish the signed-in user's public key again
    pub async fn republish_public_key(&self, passphrase: Option<&str>) -> Result<DirectoryEntry> {
        let user = self.current_user()?;
        let passphrase = self.read_passphrase(passphrase)?;
        self.keys.republish_public_key(&user, passphrase).await
    }

    /// The signed-in user's public key, base64 SPKI
    pub async fn public_key(&self, passphrase: Option<&str>) -> Result<String> {
        let user = self.current_user()?;
        let passphrase = self.read_passphrase(passphrase)?;
        self.keys.load_private_key(&user, passphrase).await?.public_key().to_base64()
    }

    /// Wrap a legacy plaintext key under `passphrase`
    pub async fn migrate_to_passphrase(&self, passphrase: &str) -> Result<bool> {
        let user = self.current_user()?;
        let key_store = self.key_store().clone();
        let passphrase = Zeroizing::new(passphrase.to_string());

        tokio::task::spawn_blocking(move || key_store.migrate_to_passphrase(&user, &passphrase))
            .await?
    }

    /// Delete the signed-in user's private key
    pub async fn delete_keys(&self) -> Result<bool> {
        let user = self.current_user()?;
        self.keys.delete_keys(&user).await
    }

    // ── Messages ─────────────────────────────────────────────────────────

    /// Encrypt message text to a base64 SPKI public key
    pub async fn encrypt_message(&self, plaintext: &str, recipient_public_key: &str) -> Result<String> {
        self.current_user()?;
        let messages = self.messages.clone();
        let plaintext = Zeroizing::new(plaintext.to_string());
        let recipient = recipient_public_key.to_string();

        tokio::task::spawn_blocking(move || messages.encrypt(&plaintext, &recipient)).await?
    }

    /// Encrypt message text to a user's published key
    pub async fn encrypt_message_for(&self, recipient: &str, plaintext: &str) -> Result<String> {
        self.current_user()?;
        let key = self.fetch_recipient_key(recipient).await?;
        let plaintext = Zeroizing::new(plaintext.to_string());

        tokio::task::spawn_blocking(move || MessageCipher::encrypt_to(plaintext.as_bytes(), &key))
            .await?
    }

    /// Decrypt a message addressed to the signed-in user
    pub async fn decrypt_message(&self, ciphertext: &str, passphrase: Option<&str>) -> Result<String> {
        let user = self.current_user()?;
        let passphrase = self.read_passphrase(passphrase)?.map(|p| Zeroizing::new(p.to_string()));
        let messages = self.messages.clone();
        let ciphertext = ciphertext.to_string();

        tokio::task::spawn_blocking(move || {
            messages.decrypt(&ciphertext, &user, passphrase.as_deref().map(|p| p.as_str()))
        })
        .await?
    }

    // ── Files ────────────────────────────────────────────────────────────

    /// Encrypt a file to a base64 SPKI public key
    pub async fn encrypt_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        mime_type: &str,
        recipient_public_key: &str,
    ) -> Result<EncryptedFilePackage> {
        let sender = self.current_user()?;
        let files = self.files.clone();
        let (name, mime_type) = (name.to_string(), mime_type.to_string());
        let recipient = recipient_public_key.to_string();

        tokio::task::spawn_blocking(move || {
            files.encrypt(&bytes, &name, &mime_type, &recipient, &sender)
        })
        .await?
    }

    /// Encrypt a file to a user's published key
    pub async fn encrypt_file_for(
        &self,
        recipient: &str,
        bytes: Vec<u8>,
        name: &str,
        mime_type: &str,
    ) -> Result<EncryptedFilePackage> {
        let sender = self.current_user()?;
        let key = self.fetch_recipient_key(recipient).await?;
        let (name, mime_type) = (name.to_string(), mime_type.to_string());

        tokio::task::spawn_blocking(move || {
            FileCipher::encrypt_to(&bytes, &name, &mime_type, &key, &sender)
        })
        .await?
    }

    /// Decrypt a file addressed to the signed-in user
    pub async fn decrypt_file(
        &self,
        ciphertext: Vec<u8>,
        metadata: FileMetadata,
        passphrase: Option<&str>,
    ) -> Result<DecryptedFile> {
        let user = self.current_user()?;
        let passphrase = self.read_passphrase(passphrase)?.map(|p| Zeroizing::new(p.to_string()));
        let files = self.files.clone();

        tokio::task::spawn_blocking(move || {
            files.decrypt(&ciphertext, &metadata, &user, passphrase.as_deref().map(|p| p.as_str()))
        })
        .await?
    }

    async fn fetch_recipient_key(&self, recipient: &str) -> Result<crypto::PublicKey> {
        let user = UserId::new(recipient)
            .map_err(|_| Error::RecipientKeyUnavailable(recipient.to_string()))?;

        let entry = self
            .directory
            .get_public_key(&user)
            .await
            .map_err(|e| e.for_lookup(&user))?;

        entry.parse_key().map_err(|e| {
            tracing::warn!("Published key for {} does not import: {}", user, e);
            Error::RecipientKeyUnavailable(user.to_string())
        })
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Enclave Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        target: std::env::consts::OS,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Target operating system
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Key pairs shared across tests; RSA generation is too slow to repeat
#[cfg(test)]
pub(crate) mod test_support {
    use once_cell::sync::Lazy;

    use crate::crypto::{ExportedKeyPair, KeyPair};

    fn generate(bits: usize) -> ExportedKeyPair {
        KeyPair::generate(bits).unwrap().export().unwrap()
    }

    pub static ALICE: Lazy<ExportedKeyPair> = Lazy::new(|| generate(2048));
    pub static BOB: Lazy<ExportedKeyPair> = Lazy::new(|| generate(2048));
    pub static LARGE: Lazy<ExportedKeyPair> = Lazy::new(|| generate(4096));
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::storage::MemoryStorage;

    fn config(protection: KeyProtection) -> CoreConfig {
        CoreConfig {
            rsa_key_bits: 2048,
            key_protection: protection,
            ..CoreConfig::default()
        }
    }

    fn enclave(directory: Arc<InMemoryDirectory>, protection: KeyProtection) -> EnclaveCore {
        EnclaveCore::new(config(protection), Arc::new(MemoryStorage::new()), directory).unwrap()
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, version());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let bad = CoreConfig {
            pbkdf2_iterations: 10,
            ..CoreConfig::default()
        };
        assert!(matches!(
            EnclaveCore::new(bad, Arc::new(MemoryStorage::new()), Arc::new(InMemoryDirectory::new())),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_requires_session() {
        let core = enclave(Arc::new(InMemoryDirectory::new()), KeyProtection::Plaintext);

        assert!(matches!(core.initialize_keys(None).await, Err(Error::NotAuthenticated)));
        assert!(matches!(
            core.decrypt_message("AAAA", None).await,
            Err(Error::NotAuthenticated)
        ));

        core.sign_in("alice").unwrap();
        core.sign_out();
        assert!(matches!(core.current_user(), Err(Error::NotAuthenticated)));
        assert!(matches!(core.sign_in(""), Err(Error::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_message_exchange_through_directory() {
        let directory = Arc::new(InMemoryDirectory::new());
        let alice = enclave(directory.clone(), KeyProtection::Plaintext);
        let bob = enclave(directory.clone(), KeyProtection::Plaintext);

        alice.sign_in("alice").unwrap();
        bob.sign_in("bob").unwrap();
        alice.initialize_keys(None).await.unwrap();
        bob.initialize_keys(None).await.unwrap();

        let ciphertext = alice.encrypt_message_for("bob", "hi bob").await.unwrap();
        assert_eq!(bob.decrypt_message(&ciphertext, None).await.unwrap(), "hi bob");
        assert!(matches!(
            alice.decrypt_message(&ciphertext, None).await,
            Err(Error::DecryptionFailed)
        ));

        let bob_key = bob.public_key(None).await.unwrap();
        let direct = alice.encrypt_message("direct", &bob_key).await.unwrap();
        assert_eq!(bob.decrypt_message(&direct, None).await.unwrap(), "direct");
    }

    #[tokio::test]
    async fn test_file_exchange_through_directory() {
        let directory = Arc::new(InMemoryDirectory::new());
        let alice = enclave(directory.clone(), KeyProtection::Plaintext);
        let bob = enclave(directory.clone(), KeyProtection::Passphrase);

        alice.sign_in("alice").unwrap();
        bob.sign_in("bob").unwrap();
        bob.initialize_keys(Some("bob's passphrase")).await.unwrap();

        let package = alice
            .encrypt_file_for("bob", b"\x89PNG...".to_vec(), "cat.png", "image/png")
            .await
            .unwrap();
        assert_eq!(package.metadata.encrypted_by, "alice");

        assert!(matches!(
            bob.decrypt_file(package.ciphertext.clone(), package.metadata.clone(), None).await,
            Err(Error::PassphraseRequired)
        ));
        assert!(matches!(
            bob.decrypt_file(package.ciphertext.clone(), package.metadata.clone(), Some("nope"))
                .await,
            Err(Error::DecryptionFailed)
        ));

        let file = bob
            .decrypt_file(package.ciphertext, package.metadata, Some("bob's passphrase"))
            .await
            .unwrap();
        assert_eq!(&*file.bytes, b"\x89PNG...");
        assert_eq!(file.name, "cat.png");
    }

    #[tokio::test]
    async fn test_unknown_recipient() {
        let core = enclave(Arc::new(InMemoryDirectory::new()), KeyProtection::Plaintext);
        core.sign_in("alice").unwrap();

        assert!(matches!(
            core.encrypt_message_for("nobody", "hi").await,
            Err(Error::RecipientKeyUnavailable(_))
        ));
        assert!(matches!(
            core.encrypt_file_for("", vec![1], "a", "b").await,
            Err(Error::RecipientKeyUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_outage_on_lookup() {
        let directory = Arc::new(InMemoryDirectory::new());
        let core = enclave(directory.clone(), KeyProtection::Plaintext);
        core.sign_in("alice").unwrap();
        directory.set_offline(true);

        let err = core.encrypt_message_for("bob", "hi").await.unwrap_err();
        assert!(matches!(err, Error::DirectoryUnavailable(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_passphrase_deployment_requires_passphrase() {
        let core = enclave(Arc::new(InMemoryDirectory::new()), KeyProtection::Passphrase);
        core.sign_in("alice").unwrap();

        assert!(matches!(core.initialize_keys(None).await, Err(Error::PassphraseRequired)));
        assert!(!core.key_store().exists(&core.current_user().unwrap()).unwrap());
    }

    #[tokio::test]
    async fn test_regenerate_orphans_old_ciphertexts() {
        let directory = Arc::new(InMemoryDirectory::new());
        let core = enclave(directory, KeyProtection::Plaintext);
        core.sign_in("alice").unwrap();
        core.initialize_keys(None).await.unwrap();

        let old = core.encrypt_message_for("alice", "before").await.unwrap();
        core.regenerate_key_pair(None).await.unwrap();

        assert!(matches!(
            core.decrypt_message(&old, None).await,
            Err(Error::DecryptionFailed)
        ));
        let new = core.encrypt_message_for("alice", "after").await.unwrap();
        assert_eq!(core.decrypt_message(&new, None).await.unwrap(), "after");
    }

    #[tokio::test]
    async fn test_migrate_and_delete() {
        let core = enclave(Arc::new(InMemoryDirectory::new()), KeyProtection::Plaintext);
        core.sign_in("alice").unwrap();
        core.initialize_keys(None).await.unwrap();

        assert!(core.migrate_to_passphrase("new passphrase").await.unwrap());
        assert!(matches!(core.public_key(None).await, Err(Error::PassphraseRequired)));
        assert!(core.public_key(Some("new passphrase")).await.is_ok());

        assert!(core.delete_keys().await.unwrap());
        assert!(matches!(
            core.public_key(Some("new passphrase")).await,
            Err(Error::KeyNotFound(_))
        ));
    }
}
