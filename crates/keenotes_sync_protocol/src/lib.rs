//! # KeeNotes Sync Protocol
//!
//! Wire messages exchanged with the KeeNotes server.
//!
//! This crate provides:
//! - `ClientMessage` frames sent over the realtime WebSocket
//! - `ServerMessage` frames received from it, with unknown types tolerated
//! - `NotePayload`, the wire form of a single note
//! - `PostNoteRequest` / `PostNoteResponse` for the HTTP posting endpoint
//!
//! All frames are JSON objects discriminated by a `"type"` field.
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    decode_server_frame, ClientMessage, NotePayload, PostNoteRequest, PostNoteResponse,
    ServerMessage, DEFAULT_CHANNEL,
};
