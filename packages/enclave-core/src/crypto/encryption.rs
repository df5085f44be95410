//! # Symmetric Encryption
//!
//! AES-256-GCM for bulk payloads (file content) and for wrapping private keys
//! at rest.
//!
//! ## Hybrid File Encryption
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      HYBRID ENCRYPTION FLOW                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Step 1: Random content key (32 bytes) + random nonce (12 bytes)       │
//! │                                                                         │
//! │  Step 2: AES-256-GCM(key, nonce, file_bytes)                           │
//! │          → ciphertext || 16-byte tag                                   │
//! │                                                                         │
//! │  Step 3: RSA-OAEP(recipient_public, base64(content_key))               │
//! │          → encrypted symmetric key                                     │
//! │                                                                         │
//! │  Output: ciphertext bytes + { iv, encryptedSymmetricKey, ... }         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No associated data is bound into the tag. Peers that implement the same
//! metadata format authenticate exactly the ciphertext bytes.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the content key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// A nonce (number used once) for AES-GCM encryption
///
/// **Never reuse a nonce with the same key.** Every content key here is
/// fresh per file, and key-wrapping keys get a fresh salt per store, so
/// random nonces are well inside the birthday bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from existing bytes
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, which must be exactly 12 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// An AES-256-GCM key
///
/// Zeroized when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; KEY_SIZE]);

impl ContentKey {
    /// Generate a random 256-bit key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, which must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Export the raw key bytes
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.0)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.0.into())
    }
}

/// Encrypt under a caller-supplied nonce
///
/// Returns the ciphertext with the 16-byte tag appended.
pub fn encrypt(key: &ContentKey, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>> {
    key.cipher()
        .encrypt(AesNonce::from_slice(&nonce.0), plaintext)
        .map_err(|e| Error::EncryptionFailed(format!("AES-GCM encryption failed: {}", e)))
}

/// Decrypt and verify a ciphertext with its appended tag
///
/// ## Errors
///
/// `IntegrityCheckFailed` if the tag does not verify: the ciphertext, the tag,
/// the nonce or the key differ from what was used to encrypt. Callers that
/// must not reveal *which* input was wrong (key unwrapping) remap this.
pub fn decrypt(key: &ContentKey, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::IntegrityCheckFailed);
    }

    key.cipher()
        .decrypt(AesNonce::from_slice(&nonce.0), ciphertext)
        .map_err(|_| Error::IntegrityCheckFailed)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_basic() {
        let key = ContentKey::from_bytes([42u8; 32]);
        let nonce = Nonce::random();

        let ciphertext = encrypt(&key, &nonce, b"Hello, World!").unwrap();
        assert_eq!(ciphertext.len(), 13 + TAG_SIZE);

        let decrypted = decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(decrypted, b"Hello, World!");
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let key = ContentKey::generate();
        let nonce = Nonce::random();

        let ciphertext = encrypt(&key, &nonce, b"").unwrap();
        assert_eq!(ciphertext.len(), TAG_SIZE);
        assert!(decrypt(&key, &nonce, &ciphertext).unwrap().is_empty());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = ContentKey::generate();
        let nonce = Nonce::random();
        let mut ciphertext = encrypt(&key, &nonce, b"Hello, World!").unwrap();

        ciphertext[0] ^= 0x01;

        assert!(matches!(
            decrypt(&key, &nonce, &ciphertext),
            Err(Error::IntegrityCheckFailed)
        ));
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let key = ContentKey::generate();
        let ciphertext = encrypt(&key, &Nonce::from_bytes([1; 12]), b"data").unwrap();

        assert!(decrypt(&key, &Nonce::from_bytes([2; 12]), &ciphertext).is_err());
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = ContentKey::generate();
        assert!(matches!(
            decrypt(&key, &Nonce::random(), &[0u8; 5]),
            Err(Error::IntegrityCheckFailed)
        ));
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(*ContentKey::generate().to_bytes(), *ContentKey::generate().to_bytes());
    }

    #[test]
    fn test_slice_constructors_check_length() {
        assert!(Nonce::from_slice(&[0u8; 11]).is_none());
        assert!(Nonce::from_slice(&[0u8; 12]).is_some());
        assert!(ContentKey::from_slice(&[0u8; 31]).is_none());
        assert!(ContentKey::from_slice(&[0u8; 32]).is_some());
    }
}
