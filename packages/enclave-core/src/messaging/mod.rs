//! # Messaging Module
//!
//! Encryption of chat message text directly under the recipient's RSA key.
//!
//! ## Message Encryption
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MESSAGE ENCRYPTION FLOW                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Sender                                                                │
//! │  ──────                                                                 │
//! │  "hello" ──UTF-8──► RSA-OAEP-SHA256(recipient public) ──► base64       │
//! │                                                                         │
//! │  The base64 text becomes the `content` field of the chat message.      │
//! │                                                                         │
//! │  Recipient                                                             │
//! │  ─────────                                                              │
//! │  base64 ──► RSA-OAEP-SHA256(own private, from KeyStore) ──► UTF-8      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One OAEP block per message: a 4096-bit key carries at most 446 bytes of
//! UTF-8. Anything longer goes through [`FileCipher`].

pub mod files;

pub use files::{DecryptedFile, EncryptedFilePackage, FileCipher, FileMetadata};

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{codec, PrivateKey, PublicKey};
use crate::error::{Error, Result};
use crate::identity::UserId;
use crate::storage::KeyStore;

/// Encrypts message text to a recipient and decrypts messages addressed to
/// a local identity
#[derive(Clone)]
pub struct MessageCipher {
    key_store: Arc<KeyStore>,
}

impl MessageCipher {
    /// Create a cipher that reads private keys from `key_store`
    pub fn new(key_store: Arc<KeyStore>) -> Self {
        Self { key_store }
    }

    /// Encrypt `plaintext` to a base64 SPKI public key
    ///
    /// ## Errors
    ///
    /// - `InvalidKeyMaterial` if the key does not import
    /// - `PlaintextTooLarge` if the UTF-8 bytes exceed the key's OAEP capacity
    pub fn encrypt(&self, plaintext: &str, recipient_public_key: &str) -> Result<String> {
        let key = PublicKey::from_base64(recipient_public_key)?;
        Self::encrypt_to(plaintext.as_bytes(), &key)
    }

    /// Encrypt raw bytes to an already imported key
    pub fn encrypt_to(plaintext: &[u8], key: &PublicKey) -> Result<String> {
        let ciphertext = key.encrypt(plaintext)?;
        tracing::debug!("Encrypted {} byte message", plaintext.len());
        Ok(codec::encode(ciphertext))
    }

    /// Decrypt a message addressed to `user`
    ///
    /// ## Errors
    ///
    /// - `KeyNotFound`, `PassphraseRequired` from the key store
    /// - `DecryptionFailed` for a wrong passphrase, a ciphertext for another
    ///   key, damaged ciphertext, or a plaintext that is not UTF-8
    pub fn decrypt(&self, ciphertext: &str, user: &UserId, passphrase: Option<&str>) -> Result<String> {
        let private = self.key_store.retrieve(user, passphrase)?;
        let plaintext = Self::decrypt_with(&private, ciphertext)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| Error::DecryptionFailed)
    }

    /// Decrypt base64 ciphertext with an already loaded private key
    pub fn decrypt_with(private: &PrivateKey, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>> {
        let bytes = codec::decode(ciphertext.trim()).map_err(|_| Error::DecryptionFailed)?;
        private.decrypt(&bytes)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::test_support::{ALICE, BOB, LARGE};

    fn cipher_with(user: &str, private_key: &str) -> (MessageCipher, UserId) {
        let store = Arc::new(KeyStore::with_iterations(Arc::new(MemoryStorage::new()), 1000));
        let user = UserId::new(user).unwrap();
        let key = PrivateKey::from_base64(private_key).unwrap();
        store.store(&user, &key, None).unwrap();
        (MessageCipher::new(store), user)
    }

    #[test]
    fn test_round_trip() {
        let (cipher, alice) = cipher_with("alice", &ALICE.private_key);

        for message in ["", "hello", "héllo wörld 👋", "line\nbreaks\tand tabs"] {
            let ciphertext = cipher.encrypt(message, &ALICE.public_key).unwrap();
            assert_eq!(cipher.decrypt(&ciphertext, &alice, None).unwrap(), message);
        }
    }

    #[test]
    fn test_ciphertext_is_base64_block() {
        let (cipher, _) = cipher_with("alice", &ALICE.private_key);
        let ciphertext = cipher.encrypt("hi", &ALICE.public_key).unwrap();
        assert_eq!(codec::decode(&ciphertext).unwrap().len(), 256);
    }

    #[test]
    fn test_size_boundary_4096() {
        let (cipher, alice) = cipher_with("alice", &LARGE.private_key);

        let at_limit = "a".repeat(446);
        let ciphertext = cipher.encrypt(&at_limit, &LARGE.public_key).unwrap();
        assert_eq!(cipher.decrypt(&ciphertext, &alice, None).unwrap(), at_limit);

        let over_limit = "a".repeat(447);
        assert!(matches!(
            cipher.encrypt(&over_limit, &LARGE.public_key),
            Err(Error::PlaintextTooLarge { size: 447, capacity: 446 })
        ));
    }

    #[test]
    fn test_size_limit_counts_utf8_bytes() {
        let (cipher, _) = cipher_with("alice", &ALICE.private_key);
        // 95 two-byte characters: 190 bytes, exactly the 2048-bit capacity
        assert!(cipher.encrypt(&"é".repeat(95), &ALICE.public_key).is_ok());
        assert!(matches!(
            cipher.encrypt(&"é".repeat(96), &ALICE.public_key),
            Err(Error::PlaintextTooLarge { .. })
        ));
    }

    #[test]
    fn test_key_isolation() {
        let (alice_cipher, _) = cipher_with("alice", &ALICE.private_key);
        let (bob_cipher, bob) = cipher_with("bob", &BOB.private_key);

        let ciphertext = alice_cipher.encrypt("for alice only", &ALICE.public_key).unwrap();
        assert!(matches!(
            bob_cipher.decrypt(&ciphertext, &bob, None),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_corrupted_ciphertext() {
        let (cipher, alice) = cipher_with("alice", &ALICE.private_key);
        let ciphertext = cipher.encrypt("hello", &ALICE.public_key).unwrap();

        let mut bytes = codec::decode(&ciphertext).unwrap();
        bytes[100] ^= 0x01;
        let damaged = codec::encode(bytes);

        assert!(matches!(
            cipher.decrypt(&damaged, &alice, None),
            Err(Error::DecryptionFailed)
        ));
        assert!(matches!(
            cipher.decrypt("not base64!", &alice, None),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_invalid_recipient_key() {
        let (cipher, _) = cipher_with("alice", &ALICE.private_key);
        assert!(matches!(
            cipher.encrypt("hi", "Zm9v"),
            Err(Error::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_missing_private_key() {
        let (cipher, _) = cipher_with("alice", &ALICE.private_key);
        let ciphertext = cipher.encrypt("hi", &BOB.public_key).unwrap();
        let carol = UserId::new("carol").unwrap();

        assert!(matches!(
            cipher.decrypt(&ciphertext, &carol, None),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_non_utf8_plaintext_fails() {
        let (cipher, alice) = cipher_with("alice", &ALICE.private_key);
        let key = PublicKey::from_base64(&ALICE.public_key).unwrap();
        let ciphertext = MessageCipher::encrypt_to(&[0xff, 0xfe], &key).unwrap();

        assert!(matches!(
            cipher.decrypt(&ciphertext, &alice, None),
            Err(Error::DecryptionFailed)
        ));
    }
}
