//! # Identity Key Pairs
//!
//! Long-term asymmetric keys for an identity: RSA with OAEP padding and
//! SHA-256 as both the OAEP hash and the MGF1 hash.
//!
//! ## Key Formats
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY FORMATS                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  PublicKey                                                      │   │
//! │  │  ─────────                                                       │   │
//! │  │  • SubjectPublicKeyInfo (SPKI) DER, base64 for transport       │   │
//! │  │  • Published to the key directory, shared freely               │   │
//! │  │  • key_id = hex(SHA-256(SPKI DER))[..32]                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  PrivateKey                                                     │   │
//! │  │  ──────────                                                      │   │
//! │  │  • PKCS#8 DER, base64 at rest (optionally passphrase-wrapped)  │   │
//! │  │  • Never leaves the device, zeroized on drop                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## OAEP Capacity
//!
//! A single OAEP block holds at most `k - 2·hLen - 2` bytes, where `k` is the
//! modulus size in bytes and `hLen = 32` for SHA-256. For a 4096-bit key that
//! is `512 - 66 = 446` bytes.

use std::fmt;

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::codec;
use crate::error::{Error, Result};

/// Default modulus size in bits
pub const DEFAULT_KEY_BITS: usize = 4096;

/// Smallest modulus accepted for generation or import
pub const MIN_KEY_BITS: usize = 2048;

/// Largest modulus accepted for generation
pub const MAX_KEY_BITS: usize = 8192;

/// OAEP padding overhead for SHA-256: two hash lengths plus two bytes
pub const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// Length of a key id in hex characters
pub const KEY_ID_LEN: usize = 32;

fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// An RSA-OAEP public key
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Import a key from SPKI DER bytes
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| Error::InvalidKeyMaterial(format!("Invalid SPKI public key: {}", e)))?;

        if key.size() * 8 < MIN_KEY_BITS {
            return Err(Error::InvalidKeyMaterial(format!(
                "Public key modulus is {} bits, minimum is {}",
                key.size() * 8,
                MIN_KEY_BITS
            )));
        }

        Ok(Self(key))
    }

    /// Import a key from base64 SPKI text (the directory format)
    ///
    /// Undecodable base64 is reported as `InvalidKeyMaterial` too: at this
    /// level the caller only cares that the key is unusable.
    pub fn from_base64(text: &str) -> Result<Self> {
        let der = codec::decode(text.trim())
            .map_err(|e| Error::InvalidKeyMaterial(format!("Public key is not base64: {}", e)))?;
        Self::from_der(&der)
    }

    /// Export as SPKI DER bytes
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.0
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| Error::Internal(format!("SPKI export failed: {}", e)))
    }

    /// Export as base64 SPKI text
    pub fn to_base64(&self) -> Result<String> {
        Ok(codec::encode(self.to_der()?))
    }

    /// Short stable fingerprint of this key
    pub fn key_id(&self) -> Result<String> {
        let digest = Sha256::digest(self.to_der()?);
        let mut id = hex::encode(digest);
        id.truncate(KEY_ID_LEN);
        Ok(id)
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }

    /// Largest plaintext, in bytes, a single OAEP block can carry
    pub fn oaep_capacity(&self) -> usize {
        self.0.size().saturating_sub(OAEP_SHA256_OVERHEAD)
    }

    /// Encrypt one OAEP block
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let capacity = self.oaep_capacity();
        if plaintext.len() > capacity {
            return Err(Error::PlaintextTooLarge {
                size: plaintext.len(),
                capacity,
            });
        }

        self.0
            .encrypt(&mut OsRng, oaep(), plaintext)
            .map_err(|e| Error::EncryptionFailed(format!("RSA-OAEP encryption failed: {}", e)))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.bits())
            .field("key_id", &self.key_id().unwrap_or_default())
            .finish()
    }
}

/// An RSA-OAEP private key
///
/// The inner key zeroizes its components when dropped.
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Import a key from PKCS#8 DER bytes
    pub fn from_der(der: &[u8]) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|e| Error::InvalidKeyMaterial(format!("Invalid PKCS#8 private key: {}", e)))
    }

    /// Import a key from base64 PKCS#8 text
    pub fn from_base64(text: &str) -> Result<Self> {
        let der = Zeroizing::new(
            codec::decode(text.trim())
                .map_err(|e| Error::InvalidKeyMaterial(format!("Private key is not base64: {}", e)))?,
        );
        Self::from_der(&der)
    }

    /// Export as PKCS#8 DER bytes
    pub fn to_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.0
            .to_pkcs8_der()
            .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
            .map_err(|e| Error::Internal(format!("PKCS#8 export failed: {}", e)))
    }

    /// Export as base64 PKCS#8 text
    pub fn to_base64(&self) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(codec::encode(self.to_der()?.as_slice())))
    }

    /// The matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.to_public_key())
    }

    /// Decrypt one OAEP block
    ///
    /// Uses blinding so the private-key operation's timing does not depend on
    /// the ciphertext. Every failure maps to the same `DecryptionFailed`.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.0
            .decrypt_blinded(&mut OsRng, oaep(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| Error::DecryptionFailed)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("bits", &(self.0.size() * 8))
            .finish_non_exhaustive()
    }
}

/// A freshly generated key pair
pub struct KeyPair {
    /// Public half (publish this)
    pub public: PublicKey,
    /// Private half (store this locally)
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generate a new random key pair
    ///
    /// Uses the operating system's secure random number generator. A 4096-bit
    /// key takes on the order of a second or more; call this off any
    /// latency-sensitive thread.
    pub fn generate(bits: usize) -> Result<Self> {
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
            return Err(Error::InvalidConfig(format!(
                "RSA key size must be between {} and {} bits, got {}",
                MIN_KEY_BITS, MAX_KEY_BITS, bits
            )));
        }

        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::Internal(format!("RSA key generation failed: {}", e)))?;
        let public = private.to_public_key();

        Ok(Self {
            public: PublicKey(public),
            private: PrivateKey(private),
        })
    }

    /// Export both halves in their transport encodings
    pub fn export(&self) -> Result<ExportedKeyPair> {
        Ok(ExportedKeyPair {
            public_key: self.public.to_base64()?,
            private_key: self.private.to_base64()?,
        })
    }
}

/// A key pair as base64 text: SPKI public key, PKCS#8 private key
pub struct ExportedKeyPair {
    /// Base64 SPKI DER
    pub public_key: String,
    /// Base64 PKCS#8 DER
    pub private_key: Zeroizing<String>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ALICE, BOB, LARGE};

    #[test]
    fn test_generated_pairs_differ() {
        assert_ne!(ALICE.public_key, BOB.public_key);
    }

    #[test]
    fn test_public_key_round_trip() {
        let public = PublicKey::from_base64(&ALICE.public_key).unwrap();
        assert_eq!(public.to_base64().unwrap(), ALICE.public_key);
        assert_eq!(public.bits(), 2048);
    }

    #[test]
    fn test_private_key_matches_public() {
        let private = PrivateKey::from_base64(&ALICE.private_key).unwrap();
        let public = PublicKey::from_base64(&ALICE.public_key).unwrap();
        assert_eq!(private.public_key(), public);
    }

    #[test]
    fn test_oaep_capacity() {
        let small = PublicKey::from_base64(&ALICE.public_key).unwrap();
        assert_eq!(small.oaep_capacity(), 256 - 66);

        let large = PublicKey::from_base64(&LARGE.public_key).unwrap();
        assert_eq!(large.bits(), 4096);
        assert_eq!(large.oaep_capacity(), 446);
    }

    #[test]
    fn test_encrypt_decrypt_block() {
        let public = PublicKey::from_base64(&ALICE.public_key).unwrap();
        let private = PrivateKey::from_base64(&ALICE.private_key).unwrap();

        let ciphertext = public.encrypt(b"block").unwrap();
        assert_eq!(ciphertext.len(), 256);
        assert_eq!(&*private.decrypt(&ciphertext).unwrap(), b"block");
    }

    #[test]
    fn test_oaep_is_randomized() {
        let public = PublicKey::from_base64(&ALICE.public_key).unwrap();
        let a = public.encrypt(b"same").unwrap();
        let b = public.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_id_is_stable_and_distinct() {
        let alice = PublicKey::from_base64(&ALICE.public_key).unwrap();
        let bob = PublicKey::from_base64(&BOB.public_key).unwrap();

        assert_eq!(alice.key_id().unwrap().len(), KEY_ID_LEN);
        assert_eq!(alice.key_id().unwrap(), alice.key_id().unwrap());
        assert_ne!(alice.key_id().unwrap(), bob.key_id().unwrap());
    }

    #[test]
    fn test_garbage_public_key_rejected() {
        assert!(matches!(
            PublicKey::from_base64("bm90IGEga2V5"),
            Err(Error::InvalidKeyMaterial(_))
        ));
        assert!(matches!(
            PublicKey::from_base64("%%%"),
            Err(Error::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_private_key_is_not_a_public_key() {
        assert!(PublicKey::from_base64(&ALICE.private_key).is_err());
    }

    #[test]
    fn test_generate_rejects_weak_sizes() {
        assert!(matches!(KeyPair::generate(1024), Err(Error::InvalidConfig(_))));
        assert!(matches!(KeyPair::generate(16384), Err(Error::InvalidConfig(_))));
    }
}
