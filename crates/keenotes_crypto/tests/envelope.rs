//! Envelope properties: round trip, wrong password, tampering, versioning.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use keenotes_crypto::{
    CryptoError, Envelope, EnvelopeCodec, Password, HEADER_SIZE, TAG_SIZE, TIMESTAMP_SIZE,
};
use proptest::prelude::*;

fn flip_bit(envelope_b64: &str, byte_index: usize, bit: u8) -> String {
    let mut bytes = BASE64.decode(envelope_b64).unwrap();
    bytes[byte_index] ^= 1 << bit;
    BASE64.encode(bytes)
}

#[test]
fn hello_roundtrip_and_wrong_password() {
    let codec = EnvelopeCodec::new();
    let sealed = codec.encrypt("hello", &Password::new("p1")).unwrap();

    assert_eq!(codec.decrypt(&sealed, &Password::new("p1")).unwrap(), "hello");

    let err = codec.decrypt(&sealed, &Password::new("p2")).unwrap_err();
    assert_eq!(err, CryptoError::Integrity);
    assert!(err.is_integrity_failure());
}

#[test]
fn each_envelope_uses_fresh_salt_and_iv() {
    let codec = EnvelopeCodec::new();
    let password = Password::new("p1");
    let a = Envelope::from_base64(&codec.encrypt("same", &password).unwrap()).unwrap();
    let b = Envelope::from_base64(&codec.encrypt("same", &password).unwrap()).unwrap();

    assert_ne!(a.salt, b.salt);
    assert_ne!(a.iv, b.iv);
    assert_ne!(a.sealed, b.sealed);
}

#[test]
fn multibyte_and_empty_plaintexts() {
    let codec = EnvelopeCodec::new();
    let password = Password::new("pässwörd");

    for text in ["", "日本語のメモ", "line one\nline two\ttabbed"] {
        let sealed = codec.encrypt(text, &password).unwrap();
        assert_eq!(codec.decrypt(&sealed, &password).unwrap(), text);
    }
}

#[test]
fn tampering_ciphertext_tag_or_timestamp_fails() {
    let codec = EnvelopeCodec::new();
    let password = Password::new("p1");
    let sealed = codec.encrypt("hello world", &password).unwrap();
    let total = BASE64.decode(&sealed).unwrap().len();

    // First ciphertext byte, last ciphertext byte, first and last tag byte.
    let ciphertext_start = HEADER_SIZE;
    let tag_start = total - TAG_SIZE;
    for index in [ciphertext_start, tag_start - 1, tag_start, total - 1] {
        let tampered = flip_bit(&sealed, index, 3);
        assert_eq!(
            codec.decrypt(&tampered, &password),
            Err(CryptoError::Integrity),
            "byte {index}"
        );
    }

    // Low bit of the timestamp (AAD) keeps the envelope fresh but breaks auth.
    let timestamp_last = HEADER_SIZE - 1;
    assert_eq!(timestamp_last, 1 + 16 + 12 + TIMESTAMP_SIZE - 1);
    let tampered = flip_bit(&sealed, timestamp_last, 0);
    assert_eq!(
        codec.decrypt(&tampered, &password),
        Err(CryptoError::Integrity)
    );
}

#[test]
fn tampering_salt_or_iv_fails() {
    let codec = EnvelopeCodec::new();
    let password = Password::new("p1");
    let sealed = codec.encrypt("hello", &password).unwrap();

    assert!(codec.decrypt(&flip_bit(&sealed, 1, 0), &password).is_err());
    assert!(codec.decrypt(&flip_bit(&sealed, 17, 0), &password).is_err());
}

#[test]
fn version_one_is_unsupported_not_integrity() {
    let codec = EnvelopeCodec::new();
    let password = Password::new("p1");
    let sealed = codec.encrypt("hello", &password).unwrap();

    let mut bytes = BASE64.decode(&sealed).unwrap();
    bytes[0] = 0x01;
    let legacy = BASE64.encode(bytes);

    let err = codec.decrypt(&legacy, &password).unwrap_err();
    assert_eq!(err, CryptoError::UnsupportedVersion { found: 1 });
    assert!(!err.is_integrity_failure());
    assert!(err.to_string().contains("re-encrypt required"));
}

#[test]
fn truncated_envelope_is_format_error() {
    let codec = EnvelopeCodec::new();
    let short = BASE64.encode([0x02u8; 40]);
    let err = codec.decrypt(&short, &Password::new("p1")).unwrap_err();
    assert!(matches!(err, CryptoError::TooShort { len: 40, .. }));
    assert!(err.is_format_error());
}

#[test]
fn cached_password_variant_matches_decrypt() {
    let codec = EnvelopeCodec::new();
    let password = Password::new("p1");
    let sealed = codec.encrypt("batch member", &password).unwrap();
    assert_eq!(
        codec.decrypt_with_password(&sealed, &password).unwrap(),
        codec.decrypt(&sealed, &password).unwrap()
    );
}

proptest! {
    #[test]
    fn parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let _ = Envelope::parse(&bytes);
    }

    #[test]
    fn any_other_version_is_rejected(version in any::<u8>().prop_filter("not v2", |v| *v != 2),
                                     rest in proptest::collection::vec(any::<u8>(), 52..96)) {
        let mut bytes = vec![version];
        bytes.extend(rest);
        prop_assert_eq!(
            Envelope::parse(&bytes),
            Err(CryptoError::UnsupportedVersion { found: version })
        );
    }
}
