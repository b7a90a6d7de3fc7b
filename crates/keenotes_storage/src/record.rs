//! Log record types and framing.
//!
//! Each record is framed as
//! `magic (4) | version (2) | length (4) | JSON body | crc32 (4)`, with the
//! CRC covering header and body. Integers are little-endian.

use crate::error::{StorageError, StorageResult};
use crate::note::{Note, SyncState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"KNLG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + length (4)
pub const HEADER_SIZE: usize = 10;

/// CRC size.
pub const CRC_SIZE: usize = 4;

/// A change recorded in the note log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    /// Device identity, written once when the log is created.
    Identity {
        /// Stable client id announced in every handshake.
        client_id: Uuid,
    },
    /// Notes and an optional watermark applied together.
    Commit {
        /// Notes to insert or replace.
        notes: Vec<Note>,
        /// New watermark.
        sync_state: Option<SyncState>,
    },
    /// User-triggered watermark reset.
    ResetSyncState,
    /// Bulk wipe of all notes.
    DeleteAll {
        /// Whether the watermark is cleared as well.
        reset_sync_state: bool,
    },
    /// Full state written by compaction.
    Snapshot {
        /// Client id.
        client_id: Uuid,
        /// Every stored note.
        notes: Vec<Note>,
        /// Current watermark.
        sync_state: Option<SyncState>,
    },
}

impl LogRecord {
    /// Frames the record for appending.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let len =
            u32::try_from(body.len()).map_err(|_| StorageError::RecordTooLarge(body.len()))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&body);
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// Outcome of decoding the frame at the start of a buffer.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A complete, verified record and its framed length.
    Record(LogRecord, usize),
    /// The buffer ends inside this frame, or the final frame fails its CRC.
    /// Either way the write never completed.
    Torn,
}

/// Decodes the frame at the start of `buf`, which runs to the end of the log.
///
/// `offset` is only used in error messages.
pub(crate) fn decode_frame(buf: &[u8], offset: u64) -> StorageResult<Decoded> {
    if buf.len() < HEADER_SIZE {
        return Ok(Decoded::Torn);
    }

    if buf[0..4] != LOG_MAGIC {
        return Err(StorageError::corrupted(offset, "invalid magic"));
    }

    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version > LOG_VERSION {
        return Err(StorageError::corrupted(
            offset,
            format!("unsupported version {version}"),
        ));
    }

    let body_len = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
    let total_len = HEADER_SIZE + body_len + CRC_SIZE;
    if buf.len() < total_len {
        return Ok(Decoded::Torn);
    }

    let body_end = HEADER_SIZE + body_len;
    let stored_crc = u32::from_le_bytes([
        buf[body_end],
        buf[body_end + 1],
        buf[body_end + 2],
        buf[body_end + 3],
    ]);
    let computed_crc = compute_crc32(&buf[..body_end]);
    if stored_crc != computed_crc {
        if buf.len() == total_len {
            return Ok(Decoded::Torn);
        }
        return Err(StorageError::corrupted(
            offset,
            format!("checksum mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"),
        ));
    }

    let record = serde_json::from_slice(&buf[HEADER_SIZE..body_end])
        .map_err(|e| StorageError::corrupted(offset, format!("undecodable body: {e}")))?;
    Ok(Decoded::Record(record, total_len))
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LogRecord {
        LogRecord::Commit {
            notes: vec![Note::new(7, "hello", "default", "2024-01-01 00:00:00")],
            sync_state: Some(SyncState::at(7)),
        }
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn frame_decodes_back() {
        let record = sample();
        let framed = record.encode().unwrap();
        match decode_frame(&framed, 0).unwrap() {
            Decoded::Record(decoded, len) => {
                assert_eq!(decoded, record);
                assert_eq!(len, framed.len());
            }
            Decoded::Torn => panic!("expected a record"),
        }
    }

    #[test]
    fn body_uses_op_tag() {
        let framed = LogRecord::ResetSyncState.encode().unwrap();
        let body = &framed[HEADER_SIZE..framed.len() - CRC_SIZE];
        assert_eq!(body, br#"{"op":"reset_sync_state"}"#);
    }

    #[test]
    fn short_buffer_is_torn() {
        let framed = sample().encode().unwrap();
        for cut in [0, 3, HEADER_SIZE, framed.len() - 1] {
            assert!(matches!(
                decode_frame(&framed[..cut], 0).unwrap(),
                Decoded::Torn
            ));
        }
    }

    #[test]
    fn bad_crc_at_tail_is_torn_but_mid_log_is_corruption() {
        let mut framed = sample().encode().unwrap();
        framed[HEADER_SIZE + 2] ^= 0x01;
        assert!(matches!(decode_frame(&framed, 0).unwrap(), Decoded::Torn));

        framed.extend_from_slice(&LogRecord::ResetSyncState.encode().unwrap());
        assert!(matches!(
            decode_frame(&framed, 40),
            Err(StorageError::Corrupted { offset: 40, .. })
        ));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut framed = sample().encode().unwrap();
        framed[0] = b'X';
        assert!(matches!(
            decode_frame(&framed, 0),
            Err(StorageError::Corrupted { .. })
        ));
    }
}
