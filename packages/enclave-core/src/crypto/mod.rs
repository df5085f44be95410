//! # Cryptography Module
//!
//! Primitives used by Enclave Core. Nothing here knows about users, storage
//! or directories.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐         │
//! │  │  rsa_keys       │  │  encryption     │  │  kdf            │         │
//! │  │                 │  │                 │  │                 │         │
//! │  │ • RSA-OAEP      │  │ • AES-256-GCM   │  │ • PBKDF2-HMAC-  │         │
//! │  │   SHA-256       │  │ • 96-bit nonce  │  │   SHA256        │         │
//! │  │ • SPKI / PKCS#8 │  │ • 128-bit tag   │  │ • 16-byte salt  │         │
//! │  │ • key ids       │  │                 │  │                 │         │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  codec: standard base64, the text form of every binary field    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod encryption;
pub mod kdf;
pub mod rsa_keys;

pub use encryption::{decrypt, encrypt, ContentKey, Nonce, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use kdf::{derive_key_encryption_key, generate_salt, MAX_ITERATIONS, MIN_ITERATIONS, SALT_SIZE};
pub use rsa_keys::{ExportedKeyPair, KeyPair, PrivateKey, PublicKey, DEFAULT_KEY_BITS};
