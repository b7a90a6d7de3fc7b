//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A truncation asked to grow the log.
    #[error("cannot truncate log to {len} bytes; it holds {size}")]
    TruncateBeyondEnd {
        /// Requested length.
        len: u64,
        /// Current length.
        size: u64,
    },

    /// The log contains a damaged record that is not the trailing one.
    #[error("log corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Offset of the damaged record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A record body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record is too large for the 32-bit length field.
    #[error("record too large: {0} bytes")]
    RecordTooLarge(usize),
}

impl StorageError {
    pub(crate) fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            reason: reason.into(),
        }
    }
}
