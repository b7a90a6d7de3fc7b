//! # KeeNotes Crypto
//!
//! End-to-end envelope codec shared by every KeeNotes client.
//!
//! This crate provides:
//! - Argon2id (v0x13) implemented directly, on top of BLAKE2b
//! - HKDF-SHA256 key expansion bound to the v2 context string
//! - AES-256-GCM envelopes with the timestamp as associated data
//! - Conformance vectors for cross-client interoperability
//!
//! ## Envelope Contract
//!
//! - Version byte is fixed at `2`; anything else is rejected
//! - Argon2id parameters are frozen (t=3, m=64 MiB, p=1, 32-byte output)
//! - A fresh salt and IV are drawn for every envelope
//! - Keys are derived per envelope and zeroized on drop
//!
//! This is a pure crate with no I/O.
//!
//! ## Example
//!
//! ```no_run
//! use keenotes_crypto::{EnvelopeCodec, Password};
//!
//! let codec = EnvelopeCodec::new();
//! let password = Password::new("p1");
//! let envelope = codec.encrypt("hello", &password).unwrap();
//! assert_eq!(codec.decrypt(&envelope, &password).unwrap(), "hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod argon2id;
mod envelope;
mod error;
mod kdf;
pub mod vectors;

pub use argon2id::KdfParams;
pub use envelope::{
    system_now_ms, Clock, Envelope, EnvelopeCodec, ENVELOPE_VERSION, HEADER_SIZE, IV_SIZE,
    MAX_ENVELOPE_AGE_MS, MIN_ENVELOPE_SIZE, SALT_SIZE, TAG_SIZE, TIMESTAMP_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, EnvelopeKey, Password, HKDF_INFO, KEY_SIZE};
