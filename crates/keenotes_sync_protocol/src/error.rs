//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match any message shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A `sync_batch` or `realtime_update` frame could not be accepted.
    ///
    /// Its notes are lost to this session; the caller must not advance any
    /// checkpoint past it.
    #[error("rejected {kind} frame: {reason}")]
    NoteFrame {
        /// Frame type tag.
        kind: String,
        /// Decoder or validation message.
        reason: String,
    },
}

impl ProtocolError {
    /// Returns true if the failed frame carried notes.
    pub fn carries_notes(&self) -> bool {
        matches!(self, Self::NoteFrame { .. })
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
