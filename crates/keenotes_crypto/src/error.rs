//! Error types for envelope operations.

use thiserror::Error;

/// Result type for envelope operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while deriving keys or sealing/opening envelopes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The envelope string is not valid base64.
    #[error("invalid base64 envelope: {0}")]
    InvalidBase64(String),

    /// The decoded envelope is shorter than the fixed header plus tag.
    #[error("envelope too short: {len} bytes, need at least {min}")]
    TooShort {
        /// Decoded length.
        len: usize,
        /// Minimum accepted length.
        min: usize,
    },

    /// The envelope carries a version other than the current scheme.
    #[error("unsupported envelope version {found}: re-encrypt required")]
    UnsupportedVersion {
        /// Version byte found in the envelope.
        found: u8,
    },

    /// The envelope timestamp is older than the accepted window.
    #[error("envelope timestamp is {age_ms} ms old, beyond the accepted window")]
    Expired {
        /// Age of the envelope in milliseconds.
        age_ms: u64,
    },

    /// Authentication tag verification failed (wrong password or tampering).
    #[error("decryption failed: authentication tag mismatch")]
    Integrity,

    /// The decrypted bytes are not valid UTF-8.
    #[error("decryption failed: plaintext is not valid UTF-8")]
    InvalidUtf8,

    /// Argon2 parameters are out of range.
    #[error("invalid Argon2 parameters: {0}")]
    InvalidParams(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The AEAD refused to encrypt.
    #[error("encryption failed")]
    EncryptionFailed,
}

impl CryptoError {
    /// Returns true for authentication or decode failures of a single message.
    ///
    /// These never abort a sync burst; the note is stored with a placeholder.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, CryptoError::Integrity | CryptoError::InvalidUtf8)
    }

    /// Returns true for malformed-envelope errors (length, version, encoding).
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidBase64(_)
                | CryptoError::TooShort { .. }
                | CryptoError::UnsupportedVersion { .. }
                | CryptoError::Expired { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(CryptoError::Integrity.is_integrity_failure());
        assert!(CryptoError::InvalidUtf8.is_integrity_failure());
        assert!(!CryptoError::UnsupportedVersion { found: 1 }.is_integrity_failure());
        assert!(CryptoError::UnsupportedVersion { found: 1 }.is_format_error());
        assert!(!CryptoError::Integrity.is_format_error());
    }

    #[test]
    fn version_error_mentions_reencrypt() {
        let err = CryptoError::UnsupportedVersion { found: 1 };
        assert!(err.to_string().contains("re-encrypt required"));
    }
}
