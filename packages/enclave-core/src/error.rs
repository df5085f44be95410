//! # Error Handling
//!
//! Error types for Enclave Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Identity Errors                                                   │
//! │  │   ├── NotAuthenticated        - No identity context                 │
//! │  │   ├── KeyNotFound             - No private key stored               │
//! │  │   ├── PassphraseRequired      - Deployment wraps keys               │
//! │  │   └── InvalidConfig           - Rejected configuration              │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── MalformedEncoding       - Bad base64                          │
//! │  │   ├── InvalidKeyMaterial      - Key does not parse                  │
//! │  │   ├── PlaintextTooLarge       - Above the OAEP capacity             │
//! │  │   ├── EncryptionFailed        - Primitive failure on encrypt        │
//! │  │   ├── DecryptionFailed        - Wrong key / passphrase / data       │
//! │  │   └── IntegrityCheckFailed    - AEAD tag mismatch on a payload      │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── StorageReadError        - Local store read failed             │
//! │  │   └── StorageWriteError       - Local store write failed            │
//! │  │                                                                      │
//! │  ├── Directory Errors                                                  │
//! │  │   ├── DirectoryUnavailable    - Directory unreachable               │
//! │  │   └── RecipientKeyUnavailable - Peer key missing or unusable        │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      ├── SerializationError                                            │
//! │      └── Internal                                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Non-leaking Failures
//!
//! `DecryptionFailed` and `IntegrityCheckFailed` carry no payload. Their
//! messages are fixed strings, so a caller (or whoever reads its logs) cannot
//! tell a wrong passphrase from a corrupted record, or a foreign ciphertext
//! from a damaged one.

use thiserror::Error;

/// Result type alias for Enclave Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Enclave Core
///
/// Closed set: callers match on it to decide between "message unavailable",
/// "retry later" and "payload was tampered with".
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Identity Errors (200-299)
    // ========================================================================

    /// No identity context (nobody signed in, or an empty user id)
    #[error("Not authenticated. Sign in before using encryption keys.")]
    NotAuthenticated,

    /// No private key stored for this identity
    #[error("No private key stored for {0}")]
    KeyNotFound(String),

    /// The deployment wraps private keys and no passphrase was supplied
    #[error("A passphrase is required to unlock the private key.")]
    PassphraseRequired,

    /// Configuration was rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Text was not valid standard base64
    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Key material could not be imported
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Plaintext exceeds the single-block OAEP capacity of the key
    #[error("Plaintext too large: {size} bytes exceeds the {capacity} byte limit for this key")]
    PlaintextTooLarge {
        /// Byte length of the rejected plaintext
        size: usize,
        /// Maximum byte length for the key
        capacity: usize,
    },

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Authenticated payload failed its integrity check
    #[error("Integrity check failed: encrypted payload was modified or corrupted")]
    IntegrityCheckFailed,

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Failed to read from local storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to local storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    // ========================================================================
    // Directory Errors (500-599)
    // ========================================================================

    /// The key directory could not be reached
    #[error("Key directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The recipient's public key could not be fetched or imported
    #[error("Recipient public key unavailable: {0}")]
    RecipientKeyUnavailable(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable numeric code for the error
    ///
    /// - 200-299: Identity
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Directory
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Identity (200-299)
            Error::NotAuthenticated => 200,
            Error::KeyNotFound(_) => 201,
            Error::PassphraseRequired => 202,
            Error::InvalidConfig(_) => 203,

            // Crypto (300-399)
            Error::MalformedEncoding(_) => 300,
            Error::InvalidKeyMaterial(_) => 301,
            Error::PlaintextTooLarge { .. } => 302,
            Error::EncryptionFailed(_) => 303,
            Error::DecryptionFailed => 304,
            Error::IntegrityCheckFailed => 305,

            // Storage (400-499)
            Error::StorageReadError(_) => 400,
            Error::StorageWriteError(_) => 401,

            // Directory (500-599)
            Error::DirectoryUnavailable(_) => 500,
            Error::RecipientKeyUnavailable(_) => 501,

            // Internal (900-999)
            Error::SerializationError(_) => 900,
            Error::Internal(_) => 901,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors may go away when the same call is retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DirectoryUnavailable(_)
                | Error::StorageReadError(_)
                | Error::StorageWriteError(_)
        )
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::NotAuthenticated | Error::PassphraseRequired | Error::KeyNotFound(_)
        )
    }

    /// True only for a failed AEAD check on an encrypted payload
    ///
    /// Upstream should report these separately from routine decryption
    /// failures.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Error::IntegrityCheckFailed)
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::MalformedEncoding(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Background task failed: {}", err))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NotAuthenticated.code(), 200);
        assert_eq!(Error::MalformedEncoding("x".into()).code(), 300);
        assert_eq!(Error::DecryptionFailed.code(), 304);
        assert_eq!(Error::IntegrityCheckFailed.code(), 305);
        assert_eq!(Error::StorageReadError("x".into()).code(), 400);
        assert_eq!(Error::DirectoryUnavailable("x".into()).code(), 500);
        assert_eq!(Error::Internal("x".into()).code(), 901);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::DirectoryUnavailable("offline".into()).is_recoverable());
        assert!(!Error::DecryptionFailed.is_recoverable());
        assert!(!Error::IntegrityCheckFailed.is_recoverable());
    }

    #[test]
    fn test_integrity_failure_is_distinct() {
        assert!(Error::IntegrityCheckFailed.is_integrity_failure());
        assert!(!Error::DecryptionFailed.is_integrity_failure());
        assert_ne!(
            Error::IntegrityCheckFailed.to_string(),
            Error::DecryptionFailed.to_string()
        );
    }

    #[test]
    fn test_decryption_failure_message_is_fixed() {
        assert_eq!(Error::DecryptionFailed.to_string(), "Decryption failed");
    }

    #[test]
    fn test_base64_error_maps_to_malformed_encoding() {
        use base64::Engine;
        let err: Error = base64::engine::general_purpose::STANDARD
            .decode("not base64!!")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::MalformedEncoding(_)));
    }
}
