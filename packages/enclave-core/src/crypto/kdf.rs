//! # Key Derivation
//!
//! Passphrase-based key derivation for wrapping the private key at rest.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   PASSPHRASE → KEY-ENCRYPTION KEY                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  PBKDF2-HMAC-SHA256(                                                   │
//! │    password   = passphrase (UTF-8),                                    │
//! │    salt       = 16 random bytes, fresh per store,                      │
//! │    iterations = ≥ 250 000,                                             │
//! │    length     = 32 bytes                                               │
//! │  )                                                                     │
//! │                                                                         │
//! │  → AES-256-GCM key that encrypts the PKCS#8 private key                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Aspect | Choice |
//! |--------|--------|
//! | PRF | HMAC-SHA256 |
//! | Salt | 16 bytes from the OS RNG |
//! | Iterations | 250 000 to 10 000 000, recorded per wrapped record |

use rand::RngCore;
use sha2::Sha256;

use super::encryption::{ContentKey, KEY_SIZE};

/// Minimum (and default) PBKDF2 iteration count for new records
pub const MIN_ITERATIONS: u32 = 250_000;

/// Largest iteration count accepted from config or a stored record
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Salt length in bytes
pub const SALT_SIZE: usize = 16;

/// Generate a fresh random salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a key-encryption key from a passphrase
///
/// Deliberately slow: at the default iteration count this takes a noticeable
/// fraction of a second. Run it on a blocking thread.
pub fn derive_key_encryption_key(passphrase: &str, salt: &[u8], iterations: u32) -> ContentKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key);
    let derived = ContentKey::from_bytes(key);
    zeroize::Zeroize::zeroize(&mut key);
    derived
}
