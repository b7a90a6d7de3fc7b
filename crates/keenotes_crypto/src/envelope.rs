//! Versioned note envelope and the codec that seals and opens it.
//!
//! Wire layout, base64-encoded as one string:
//!
//! ```text
//! | version (1) | salt (16) | iv (12) | timestamp (8, BE ms) | ciphertext (N) | tag (16) |
//! ```
//!
//! The timestamp bytes are the AES-GCM associated data, so tampering with
//! them fails authentication even when ciphertext and tag are intact.

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_key, EnvelopeKey, Password};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current envelope version.
pub const ENVELOPE_VERSION: u8 = 2;
/// Size of the per-envelope salt in bytes.
pub const SALT_SIZE: usize = 16;
/// Size of the GCM nonce in bytes.
pub const IV_SIZE: usize = 12;
/// Size of the big-endian millisecond timestamp in bytes.
pub const TIMESTAMP_SIZE: usize = 8;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Fixed header length before the ciphertext.
pub const HEADER_SIZE: usize = 1 + SALT_SIZE + IV_SIZE + TIMESTAMP_SIZE;
/// Smallest valid envelope (empty plaintext).
pub const MIN_ENVELOPE_SIZE: usize = HEADER_SIZE + TAG_SIZE;
/// Envelopes older than this are rejected (ten years of milliseconds).
pub const MAX_ENVELOPE_AGE_MS: u64 = 10 * 365 * 24 * 60 * 60 * 1000;

/// A parsed envelope. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Per-envelope Argon2/HKDF salt.
    pub salt: [u8; SALT_SIZE],
    /// AES-GCM nonce.
    pub iv: [u8; IV_SIZE],
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Ciphertext followed by the 16-byte tag.
    pub sealed: Vec<u8>,
}

impl Envelope {
    /// Parses raw envelope bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`CryptoError::TooShort`] below [`MIN_ENVELOPE_SIZE`] and
    /// with [`CryptoError::UnsupportedVersion`] for any version other than
    /// [`ENVELOPE_VERSION`]. Legacy layouts are never reinterpreted.
    pub fn parse(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < MIN_ENVELOPE_SIZE {
            return Err(CryptoError::TooShort {
                len: bytes.len(),
                min: MIN_ENVELOPE_SIZE,
            });
        }

        let version = bytes[0];
        if version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion { found: version });
        }

        let mut offset = 1;
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[offset..offset + SALT_SIZE]);
        offset += SALT_SIZE;

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[offset..offset + IV_SIZE]);
        offset += IV_SIZE;

        let mut ts = [0u8; TIMESTAMP_SIZE];
        ts.copy_from_slice(&bytes[offset..offset + TIMESTAMP_SIZE]);
        offset += TIMESTAMP_SIZE;

        Ok(Self {
            salt,
            iv,
            timestamp_ms: u64::from_be_bytes(ts),
            sealed: bytes[offset..].to_vec(),
        })
    }

    /// Decodes a base64 envelope string and parses it.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;
        Self::parse(&bytes)
    }

    /// Serializes to the wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.sealed.len());
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.extend_from_slice(&self.sealed);
        out
    }

    /// Serializes and base64-encodes.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// The associated data authenticated alongside the ciphertext.
    pub fn aad(&self) -> [u8; TIMESTAMP_SIZE] {
        self.timestamp_ms.to_be_bytes()
    }
}

/// Source of the current time in milliseconds since the epoch.
pub type Clock = fn() -> u64;

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seals and opens note envelopes.
///
/// Stateless apart from its clock. Every call derives a fresh key from the
/// password and the envelope's own salt; nothing is cached.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    clock: Clock,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    /// Creates a codec using the system clock.
    pub fn new() -> Self {
        Self {
            clock: system_now_ms,
        }
    }

    /// Creates a codec with a custom clock.
    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }

    /// Encrypts `plaintext` into a base64 envelope.
    ///
    /// Draws a fresh random salt and IV and stamps the current time.
    pub fn encrypt(&self, plaintext: &str, password: &Password) -> CryptoResult<String> {
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut iv);

        let envelope = self.seal(plaintext.as_bytes(), password, salt, iv, (self.clock)())?;
        Ok(envelope.to_base64())
    }

    /// Encrypts with caller-chosen salt, IV and timestamp.
    ///
    /// Only for conformance vectors: reusing an IV under the same key breaks
    /// GCM.
    pub fn seal(
        &self,
        plaintext: &[u8],
        password: &Password,
        salt: [u8; SALT_SIZE],
        iv: [u8; IV_SIZE],
        timestamp_ms: u64,
    ) -> CryptoResult<Envelope> {
        let key = derive_key(password, &salt)?;
        let aad = timestamp_ms.to_be_bytes();
        let sealed = cipher(&key)
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(Envelope {
            salt,
            iv,
            timestamp_ms,
            sealed,
        })
    }

    /// Decrypts a base64 envelope string.
    pub fn decrypt(&self, envelope_b64: &str, password: &Password) -> CryptoResult<String> {
        let envelope = Envelope::from_base64(envelope_b64)?;
        self.open(&envelope, password)
    }

    /// Decrypts a batch member with a password the caller already holds.
    ///
    /// Identical to [`decrypt`](Self::decrypt); exists so a batch of notes is
    /// opened against one cached password without re-querying its source.
    pub fn decrypt_with_password(
        &self,
        envelope_b64: &str,
        password: &Password,
    ) -> CryptoResult<String> {
        self.decrypt(envelope_b64, password)
    }

    /// Verifies and decrypts a parsed envelope.
    ///
    /// No partial plaintext is ever returned.
    pub fn open(&self, envelope: &Envelope, password: &Password) -> CryptoResult<String> {
        let now = (self.clock)();
        let age_ms = now.saturating_sub(envelope.timestamp_ms);
        if age_ms > MAX_ENVELOPE_AGE_MS {
            return Err(CryptoError::Expired { age_ms });
        }

        let key = derive_key(password, &envelope.salt)?;
        let aad = envelope.aad();
        let plaintext = cipher(&key)
            .decrypt(
                Nonce::from_slice(&envelope.iv),
                Payload {
                    msg: &envelope.sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Integrity)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

fn cipher(key: &EnvelopeKey) -> Aes256Gcm {
    Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()))
}
