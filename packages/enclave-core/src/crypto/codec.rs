//! # Key Codec
//!
//! Binary key material and ciphertexts travel as standard base64 text
//! (RFC 4648 alphabet, with padding). This is the encoding every text field of
//! the wire contract uses: public keys in the directory, message ciphertexts,
//! nonces and wrapped keys in metadata.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::Result;

/// Encode bytes as standard, padded base64
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard, padded base64
///
/// ## Errors
///
/// `MalformedEncoding` for characters outside the standard alphabet, missing
/// or non-canonical padding, and URL-safe input.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text.as_bytes())?)
}

// ============================================================================
// TESTS
// ============================================================================
