//! # File Encryption
//!
//! Hybrid encryption for attachments of any size.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FILE PACKAGE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ciphertext: AES-256-GCM(content_key, iv, file_bytes) || tag           │
//! │              handed to file transport as opaque bytes                  │
//! │                                                                         │
//! │  metadata (JSON, travels with the message record):                     │
//! │  {                                                                     │
//! │    "iv":                    base64(12 bytes),                          │
//! │    "encryptedSymmetricKey": base64(RSA-OAEP(base64(content_key))),     │
//! │    "originalType":          "image/png",                               │
//! │    "encryptedBy":           "<sender user id>",                        │
//! │    "encryptedAt":           "2024-05-01T12:34:56.789Z",                │
//! │    "originalName":          "photo.png",                               │
//! │    "keyId":                 "<recipient key id>"      (optional)       │
//! │  }                                                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The content key is wrapped as the UTF-8 of its base64 text, not as raw
//! bytes, so packages interoperate with existing web clients.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::MessageCipher;
use crate::crypto::{codec, encryption, ContentKey, Nonce, PrivateKey, PublicKey};
use crate::error::{Error, Result};
use crate::identity::UserId;
use crate::storage::KeyStore;

/// Name restored when the metadata carries none
pub const DEFAULT_FILE_NAME: &str = "decrypted-file";

/// MIME type restored when the metadata carries none
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Everything a recipient needs besides the ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Base64 AES-GCM nonce
    pub iv: String,
    /// Base64 RSA-OAEP ciphertext of the base64 content key
    pub encrypted_symmetric_key: String,
    /// MIME type of the plaintext file
    #[serde(default)]
    pub original_type: String,
    /// User id of the sender
    #[serde(default)]
    pub encrypted_by: String,
    /// When the file was encrypted (ISO 8601)
    #[serde(default)]
    pub encrypted_at: String,
    /// File name of the plaintext file
    #[serde(default)]
    pub original_name: String,
    /// Key id of the recipient key the content key was wrapped for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl FileMetadata {
    /// Serialize to the JSON text stored next to the attachment
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse metadata JSON
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Output of [`FileCipher::encrypt`]
#[derive(Debug, Clone)]
pub struct EncryptedFilePackage {
    /// Ciphertext with the GCM tag appended
    pub ciphertext: Vec<u8>,
    /// Metadata for the recipient
    pub metadata: FileMetadata,
}

/// Output of [`FileCipher::decrypt`]
#[derive(Debug)]
pub struct DecryptedFile {
    /// Original file content
    pub bytes: Zeroizing<Vec<u8>>,
    /// Original file name
    pub name: String,
    /// Original MIME type
    pub mime_type: String,
}

/// Hybrid file cipher
#[derive(Clone)]
pub struct FileCipher {
    key_store: Arc<KeyStore>,
}

impl FileCipher {
    /// Create a cipher that reads private keys from `key_store`
    pub fn new(key_store: Arc<KeyStore>) -> Self {
        Self { key_store }
    }

    /// Encrypt a file for the holder of a base64 SPKI public key
    ///
    /// ## Errors
    ///
    /// - `RecipientKeyUnavailable` if the recipient key does not import
    /// - `EncryptionFailed` if a primitive fails
    pub fn encrypt(
        &self,
        bytes: &[u8],
        name: &str,
        mime_type: &str,
        recipient_public_key: &str,
        sender: &UserId,
    ) -> Result<EncryptedFilePackage> {
        let key = PublicKey::from_base64(recipient_public_key)
            .map_err(|e| Error::RecipientKeyUnavailable(e.to_string()))?;
        Self::encrypt_to(bytes, name, mime_type, &key, sender)
    }

    /// Encrypt a file for an already imported recipient key
    pub fn encrypt_to(
        bytes: &[u8],
        name: &str,
        mime_type: &str,
        recipient: &PublicKey,
        sender: &UserId,
    ) -> Result<EncryptedFilePackage> {
        let content_key = ContentKey::generate();
        let nonce = Nonce::random();

        let ciphertext = encryption::encrypt(&content_key, &nonce, bytes)?;

        let key_text = Zeroizing::new(codec::encode(&content_key.to_bytes()[..]));
        let encrypted_symmetric_key = MessageCipher::encrypt_to(key_text.as_bytes(), recipient)
            .map_err(|e| match e {
                Error::EncryptionFailed(_) => e,
                other => Error::EncryptionFailed(other.to_string()),
            })?;

        let metadata = FileMetadata {
            iv: codec::encode(nonce.as_bytes()),
            encrypted_symmetric_key,
            original_type: mime_type.to_string(),
            encrypted_by: sender.to_string(),
            encrypted_at: crate::time::now_iso8601(),
            original_name: name.to_string(),
            key_id: Some(recipient.key_id()?),
        };

        tracing::debug!(
            "Encrypted {} byte file for key {}",
            bytes.len(),
            metadata.key_id.as_deref().unwrap_or("?")
        );

        Ok(EncryptedFilePackage {
            ciphertext,
            metadata,
        })
    }

    /// Decrypt a file addressed to `user`
    ///
    /// ## Errors
    ///
    /// - `KeyNotFound`, `PassphraseRequired` from the key store
    /// - `DecryptionFailed` if the content key cannot be recovered
    /// - `IntegrityCheckFailed` if the ciphertext or its tag was modified
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        metadata: &FileMetadata,
        user: &UserId,
        passphrase: Option<&str>,
    ) -> Result<DecryptedFile> {
        let private = self.key_store.retrieve(user, passphrase)?;
        Self::decrypt_with(&private, ciphertext, metadata)
    }

    /// Decrypt with an already loaded private key
    pub fn decrypt_with(
        private: &PrivateKey,
        ciphertext: &[u8],
        metadata: &FileMetadata,
    ) -> Result<DecryptedFile> {
        if let Some(key_id) = &metadata.key_id {
            if *key_id != private.public_key().key_id()? {
                tracing::debug!("File was encrypted for key {}, not ours", key_id);
                return Err(Error::DecryptionFailed);
            }
        }

        let content_key = Self::unwrap_content_key(private, &metadata.encrypted_symmetric_key)?;
        let nonce = codec::decode(&metadata.iv)
            .ok()
            .and_then(|iv| Nonce::from_slice(&iv))
            .ok_or(Error::DecryptionFailed)?;

        let bytes = encryption::decrypt(&content_key, &nonce, ciphertext).map_err(|e| {
            tracing::warn!("Encrypted file failed its integrity check");
            e
        })?;

        Ok(DecryptedFile {
            bytes: Zeroizing::new(bytes),
            name: non_empty_or(&metadata.original_name, DEFAULT_FILE_NAME),
            mime_type: non_empty_or(&metadata.original_type, DEFAULT_MIME_TYPE),
        })
    }

    fn unwrap_content_key(private: &PrivateKey, encrypted: &str) -> Result<ContentKey> {
        let key_text = MessageCipher::decrypt_with(private, encrypted)?;
        let text = std::str::from_utf8(&key_text).map_err(|_| Error::DecryptionFailed)?;
        let raw = Zeroizing::new(codec::decode(text).map_err(|_| Error::DecryptionFailed)?);

        ContentKey::from_slice(&raw).ok_or(Error::DecryptionFailed)
    }
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================
