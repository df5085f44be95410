//! # Configuration
//!
//! Deployment settings for Enclave Core, loadable from TOML.
//!
//! ```toml
//! rsa_key_bits = 4096
//! pbkdf2_iterations = 250000
//! key_protection = "passphrase"
//! storage_path = "/var/lib/enclave"
//! verbose_logging = false
//! ```
//!
//! A deployment picks exactly one key-protection variant. Keys stored under
//! the other variant are still readable, and `plaintext` keys can be migrated
//! to `passphrase` with `KeyStore::migrate_to_passphrase`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::{MAX_ITERATIONS, MIN_ITERATIONS};
use crate::crypto::rsa_keys::{DEFAULT_KEY_BITS, MAX_KEY_BITS, MIN_KEY_BITS};
use crate::error::{Error, Result};

/// How private keys are protected at rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyProtection {
    /// Wrapped under a key derived from a user passphrase
    #[default]
    Passphrase,
    /// Stored as base64 PKCS#8 without wrapping (legacy mobile clients)
    Plaintext,
}

/// Configuration for initializing Enclave Core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// RSA modulus size for newly generated key pairs
    pub rsa_key_bits: usize,
    /// PBKDF2 iteration count for newly wrapped private keys
    pub pbkdf2_iterations: u32,
    /// At-rest protection for private keys
    pub key_protection: KeyProtection,
    /// Directory for durable stores (platform default if None)
    pub storage_path: Option<String>,
    /// Enable verbose logging
    pub verbose_logging: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: DEFAULT_KEY_BITS,
            pbkdf2_iterations: MIN_ITERATIONS,
            key_protection: KeyProtection::default(),
            storage_path: None,
            verbose_logging: false,
        }
    }
}

impl CoreConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&self.rsa_key_bits)
            || self.rsa_key_bits % 1024 != 0
        {
            return Err(Error::InvalidConfig(format!(
                "rsa_key_bits must be a multiple of 1024 between {} and {}, got {}",
                MIN_KEY_BITS, MAX_KEY_BITS, self.rsa_key_bits
            )));
        }

        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.pbkdf2_iterations) {
            return Err(Error::InvalidConfig(format!(
                "pbkdf2_iterations must be between {} and {}, got {}",
                MIN_ITERATIONS, MAX_ITERATIONS, self.pbkdf2_iterations
            )));
        }

        Ok(())
    }

    /// Whether this deployment wraps private keys under a passphrase
    pub fn requires_passphrase(&self) -> bool {
        self.key_protection == KeyProtection::Passphrase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rsa_key_bits, 4096);
        assert_eq!(config.pbkdf2_iterations, 250_000);
        assert!(config.requires_passphrase());
    }

    #[test]
    fn test_parse_full_document() {
        let config = CoreConfig::from_toml_str(
            r#"
            rsa_key_bits = 3072
            pbkdf2_iterations = 600000
            key_protection = "plaintext"
            storage_path = "/tmp/enclave"
            verbose_logging = true
            "#,
        )
        .unwrap();

        assert_eq!(config.rsa_key_bits, 3072);
        assert_eq!(config.pbkdf2_iterations, 600_000);
        assert_eq!(config.key_protection, KeyProtection::Plaintext);
        assert_eq!(config.storage_path.as_deref(), Some("/tmp/enclave"));
        assert!(config.verbose_logging);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = CoreConfig::from_toml_str("verbose_logging = true").unwrap();
        assert_eq!(config.rsa_key_bits, DEFAULT_KEY_BITS);
        assert_eq!(config.key_protection, KeyProtection::Passphrase);
    }

    #[test]
    fn test_rejects_weak_settings() {
        assert!(matches!(
            CoreConfig::from_toml_str("rsa_key_bits = 1024"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            CoreConfig::from_toml_str("rsa_key_bits = 2500"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            CoreConfig::from_toml_str("pbkdf2_iterations = 1000"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            CoreConfig::from_toml_str("pbkdf2_iterations = 4000000000"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_protection() {
        assert!(matches!(
            CoreConfig::from_toml_str(r#"key_protection = "rot13""#),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enclave.toml");
        std::fs::write(&path, "rsa_key_bits = 2048\n").unwrap();

        assert_eq!(CoreConfig::from_file(&path).unwrap().rsa_key_bits, 2048);
        assert!(CoreConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
