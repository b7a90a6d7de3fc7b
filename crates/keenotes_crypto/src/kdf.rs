//! Two-stage key derivation: Argon2id followed by HKDF-SHA256.

use crate::argon2id::{argon2id, KdfParams};
use crate::error::{CryptoError, CryptoResult};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// HKDF `info` binding derived keys to this envelope scheme.
pub const HKDF_INFO: &[u8; 26] = b"KeeNotes-E2E-Encryption-v2";

/// A user password held in memory for the lifetime of a session.
///
/// The buffer is wiped on drop and never printed.
#[derive(Clone)]
pub struct Password(Zeroizing<String>);

impl Password {
    /// Wraps a password string.
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }

    /// Returns the password bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Returns true if the password is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// A derived AES-256 key for one envelope.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EnvelopeKey {
    bytes: [u8; KEY_SIZE],
}

impl EnvelopeKey {
    /// Returns the key bytes.
    ///
    /// # Security
    ///
    /// Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derives the envelope key for `password` and the envelope's `salt`.
///
/// Argon2id with [`KdfParams::V2`] stretches the password; HKDF-SHA256 then
/// expands the result using the same salt and [`HKDF_INFO`].
pub fn derive_key(password: &Password, salt: &[u8]) -> CryptoResult<EnvelopeKey> {
    derive_key_with(password, salt, &KdfParams::V2)
}

pub(crate) fn derive_key_with(
    password: &Password,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<EnvelopeKey> {
    let stretched = Zeroizing::new(argon2id(password.as_bytes(), salt, &[], &[], params)?);

    let hk = Hkdf::<Sha256>::new(Some(salt), &stretched);
    let mut bytes = [0u8; KEY_SIZE];
    hk.expand(HKDF_INFO, &mut bytes)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".into()))?;

    Ok(EnvelopeKey { bytes })
}
