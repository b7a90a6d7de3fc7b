//! # KeeNotes Sync Engine
//!
//! Resumable realtime sync and note posting for KeeNotes clients.
//!
//! This crate provides:
//! - [`SessionMachine`], the pure transport session state machine
//!   (disconnected → connecting → connected)
//! - [`Connector`] / [`FrameSocket`] transport seams, with a
//!   `tokio-tungstenite` implementation and an in-process mock
//! - [`SyncReconciler`], which decrypts inbound notes and applies them to a
//!   [`keenotes_storage::NoteStore`] with a durable watermark
//! - [`SyncClient`], the coordinator tying the two together on tokio
//! - [`NotePoster`], the encrypted note submission path
//!
//! ## Architecture
//!
//! ```text
//! socket ──► driver task ──► ordered queue ──► reconciler task ──► store
//!              │  ▲                              (spawn_blocking,
//!              ▼  │                               one event at a time)
//!          SessionMachine
//! ```
//!
//! ## Key Invariants
//!
//! - Frames are applied strictly in arrival order
//! - A batch and its `lastSyncId` checkpoint land in one atomic commit
//! - `lastSyncId` never decreases
//! - At most one socket and one reconnect timer exist at a time
//! - A note that fails to decrypt is stored with a placeholder, never dropped

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod mock;
mod poster;
mod reconciler;
mod session;
mod transport;

pub use client::{SyncClient, SyncHandle};
pub use config::{SyncConfig, DEFAULT_RECONNECT_DELAY};
pub use error::{SyncError, SyncResult};
pub use mock::{MockConnector, MockPeer, MockServer};
pub use poster::{HttpClient, HttpResponse, NotePoster, ReqwestClient};
pub use reconciler::{
    InboundEvent, SyncReconciler, SyncStats, SyncStatus, DECRYPTION_FAILED_PLACEHOLDER,
};
pub use session::{SessionEffect, SessionEvent, SessionMachine, SessionState};
pub use transport::{Connector, FrameSocket, WebSocketConnector};
