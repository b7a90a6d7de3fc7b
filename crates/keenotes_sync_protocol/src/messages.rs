//! Sync channel frames and note submission bodies.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel label used when a note omits one.
pub const DEFAULT_CHANNEL: &str = "default";

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

/// A note as it travels on the wire.
///
/// `content` is an envelope string when `encrypted` is true, plain text
/// otherwise. Servers disagree on the casing of the creation timestamp, so
/// both `created_at` and `createdAt` are accepted, and a note may carry both.
/// Absent or null fields other than `id` fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireNote")]
pub struct NotePayload {
    /// Server-assigned id, monotonic per server.
    pub id: i64,
    /// Note body or envelope.
    pub content: String,
    /// Creation timestamp as sent by the server.
    pub created_at: String,
    /// Short channel label.
    pub channel: String,
    /// Whether `content` is an envelope.
    pub encrypted: bool,
}

/// Lenient decoding shape for [`NotePayload`].
#[derive(Deserialize)]
struct WireNote {
    id: i64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default, rename = "createdAt")]
    created_at_camel: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    encrypted: Option<bool>,
}

impl From<WireNote> for NotePayload {
    fn from(wire: WireNote) -> Self {
        Self {
            id: wire.id,
            content: wire.content.unwrap_or_default(),
            created_at: wire
                .created_at
                .or(wire.created_at_camel)
                .unwrap_or_default(),
            channel: wire.channel.unwrap_or_else(default_channel),
            encrypted: wire.encrypted.unwrap_or(false),
        }
    }
}

impl NotePayload {
    /// Creates a payload for plain content on the default channel.
    pub fn new(id: i64, content: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            created_at: created_at.into(),
            channel: default_channel(),
            encrypted: false,
        }
    }

    /// Marks the content as an envelope.
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Sets the channel label.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

/// Frames the client sends over the sync channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame after connecting; declares the resume point.
    Handshake {
        /// Stable device identifier.
        client_id: Uuid,
        /// Highest note id fully applied locally.
        last_sync_id: i64,
    },
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
}

impl ClientMessage {
    /// Creates a handshake frame.
    pub fn handshake(client_id: Uuid, last_sync_id: i64) -> Self {
        Self::Handshake {
            client_id,
            last_sync_id,
        }
    }

    /// Encodes the frame as JSON text.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// Frames the server sends over the sync channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One page of a catch-up burst.
    SyncBatch {
        /// 1-based batch number.
        batch_id: u32,
        /// Number of batches in this burst.
        total_batches: u32,
        /// Notes in this batch.
        #[serde(default)]
        notes: Vec<NotePayload>,
    },
    /// End of a catch-up burst.
    SyncComplete {
        /// Notes sent during the burst.
        #[serde(default)]
        total_synced: u64,
        /// Authoritative watermark after the burst.
        #[serde(default)]
        last_sync_id: i64,
    },
    /// A note created after the burst, pushed live.
    RealtimeUpdate {
        /// The new note.
        note: NotePayload,
    },
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Server-side error report.
    Error {
        /// Human-readable description.
        #[serde(default)]
        message: String,
    },
    /// Acknowledges a note posted by this client.
    NewNoteAck {
        /// Id the server assigned.
        id: i64,
    },
    /// Any tag this client does not understand.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Encodes the frame as JSON text.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyncBatch { .. } => "sync_batch",
            Self::SyncComplete { .. } => "sync_complete",
            Self::RealtimeUpdate { .. } => "realtime_update",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
            Self::NewNoteAck { .. } => "new_note_ack",
            Self::Unknown => "unknown",
        }
    }
}

/// Frame types whose loss would leave a gap in the local note set.
const NOTE_FRAMES: [&str; 2] = ["sync_batch", "realtime_update"];

/// Decodes one text frame from the server.
///
/// Frames with an unrecognised `type` decode to [`ServerMessage::Unknown`].
/// A note-carrying frame that cannot be decoded, or a batch whose
/// `batch_id` lies outside `1..=total_batches`, is reported as
/// [`ProtocolError::NoteFrame`] so the caller can resync instead of
/// skipping notes.
pub fn decode_server_frame(text: &str) -> ProtocolResult<ServerMessage> {
    let message: ServerMessage = serde_json::from_str(text).map_err(|e| {
        match frame_type(text).filter(|kind| NOTE_FRAMES.contains(&kind.as_str())) {
            Some(kind) => ProtocolError::NoteFrame {
                kind,
                reason: e.to_string(),
            },
            None => ProtocolError::Malformed(e),
        }
    })?;
    if let ServerMessage::SyncBatch {
        batch_id,
        total_batches,
        ..
    } = &message
    {
        if *batch_id == 0 || *batch_id > *total_batches {
            return Err(ProtocolError::NoteFrame {
                kind: "sync_batch".into(),
                reason: format!("batch {batch_id} of {total_batches}"),
            });
        }
    }
    Ok(message)
}

/// Reads only the `type` tag of a frame.
fn frame_type(text: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Tag {
        #[serde(rename = "type")]
        kind: String,
    }
    serde_json::from_str::<Tag>(text).ok().map(|tag| tag.kind)
}

/// Body of the note submission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostNoteRequest {
    /// Channel label.
    pub channel: String,
    /// Envelope string, or plain text when `encrypted` is false.
    pub text: String,
    /// Local authoring time, `YYYY-MM-DD HH:MM:SS`.
    pub ts: String,
    /// Whether `text` is an envelope.
    pub encrypted: bool,
}

/// Response to a note submission.
///
/// Servers vary in which fields they send; everything is optional and
/// [`note_id`](Self::note_id) decides success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostNoteResponse {
    /// Assigned note id.
    #[serde(default)]
    pub id: Option<i64>,
    /// Explicit success flag.
    #[serde(default)]
    pub success: Option<bool>,
    /// Error or status text.
    #[serde(default)]
    pub message: Option<String>,
}

impl PostNoteResponse {
    /// Returns the assigned id unless the server reported failure.
    pub fn note_id(&self) -> Option<i64> {
        match self.success {
            Some(false) => None,
            _ => self.id,
        }
    }
}
