//! Conformance vectors for the envelope contract.
//!
//! Every client implementation must reproduce these. The Argon2id vector is
//! the one published in RFC 9106 section 5.3; the envelope vectors fix every
//! random input and pin the sealed output.

use crate::argon2id::KdfParams;

/// Argon2id known-answer vector.
#[derive(Debug, Clone)]
pub struct Argon2Vector {
    /// Identifier.
    pub id: &'static str,
    /// Password `P`.
    pub password: Vec<u8>,
    /// Salt `S`.
    pub salt: Vec<u8>,
    /// Secret `K`.
    pub secret: Vec<u8>,
    /// Associated data `X`.
    pub associated_data: Vec<u8>,
    /// Cost parameters.
    pub params: KdfParams,
    /// Expected tag.
    pub expected_tag: [u8; 32],
}

/// The RFC 9106 Argon2id test vector.
pub fn rfc9106_argon2id() -> Argon2Vector {
    Argon2Vector {
        id: "rfc9106_argon2id",
        password: vec![0x01; 32],
        salt: vec![0x02; 16],
        secret: vec![0x03; 8],
        associated_data: vec![0x04; 12],
        params: KdfParams {
            t_cost: 3,
            m_cost_kib: 32,
            lanes: 4,
            output_len: 32,
        },
        expected_tag: [
            0x0d, 0x64, 0x0d, 0xf5, 0x8d, 0x78, 0x76, 0x6c, 0x08, 0xc0, 0x37, 0xa3, 0x4a, 0x8b,
            0x53, 0xc9, 0xd0, 0x1e, 0xf0, 0x45, 0x2d, 0x75, 0xb6, 0x5e, 0xb5, 0x25, 0x20, 0xe9,
            0x6b, 0x01, 0xe6, 0x59,
        ],
    }
}

/// Envelope vector with every random input pinned.
#[derive(Debug, Clone)]
pub struct EnvelopeVector {
    /// Identifier.
    pub id: &'static str,
    /// Password.
    pub password: &'static str,
    /// Salt.
    pub salt: [u8; 16],
    /// IV.
    pub iv: [u8; 12],
    /// Timestamp in milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// UTF-8 plaintext.
    pub plaintext: &'static str,
    /// Expected sealed envelope, standard base64.
    pub expected: &'static str,
}

/// Envelope vectors covering empty, ASCII and multi-byte plaintexts.
pub fn envelope_vectors() -> Vec<EnvelopeVector> {
    vec![
        EnvelopeVector {
            id: "v2_hello",
            password: "p1",
            salt: [
                0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
                0x0e, 0x0f,
            ],
            iv: [
                0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xab,
            ],
            timestamp_ms: 1_700_000_000_000,
            plaintext: "hello",
            expected: "AgABAgMEBQYHCAkKCwwNDg+goaKjpKWmp6ipqqsAAAGLz+VoALVEC4swAosfp/ounFqy2f/p+4sbDQ==",
        },
        EnvelopeVector {
            id: "v2_empty",
            password: "correct horse battery staple",
            salt: [0x5a; 16],
            iv: [0x00; 12],
            timestamp_ms: 1_600_000_000_000,
            plaintext: "",
            expected: "AlpaWlpaWlpaWlpaWlpaWloAAAAAAAAAAAAAAAAAAAF0h26AAM3gT/sp3VqXzYy90BSvQ0M=",
        },
        EnvelopeVector {
            id: "v2_unicode",
            password: "пароль-密码",
            salt: [
                0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa, 0x99, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22,
                0x11, 0x00,
            ],
            iv: [0x42; 12],
            timestamp_ms: 1_735_689_600_000,
            plaintext: "Grocery list: 牛奶, café, 🍞",
            expected: "Av/u3cy7qpmId2ZVRDMiEQBCQkJCQkJCQkJCQkIAAAGUHyl8AEKcqYauW8RjKSawPqj3rDRQ7GmlNJ6KNiCfVLFK7AuTbyeeZCulDTOu5Mfplpn+LwI=",
        },
    ]
}
