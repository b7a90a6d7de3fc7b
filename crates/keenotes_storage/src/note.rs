//! Stored note and watermark types.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A decrypted note held in local storage.
///
/// Identity is `id`; storing a note whose id already exists replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Server-assigned id.
    pub id: i64,
    /// Decrypted body, or a placeholder when decryption failed.
    pub content: String,
    /// Short channel label.
    pub channel: String,
    /// Creation time as sent by the server.
    pub created_at: String,
    /// Local receipt time (RFC 3339).
    pub synced_at: String,
}

impl Note {
    /// Creates a note stamped with the current receipt time.
    pub fn new(
        id: i64,
        content: impl Into<String>,
        channel: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            channel: channel.into(),
            created_at: created_at.into(),
            synced_at: now_rfc3339(),
        }
    }
}

/// The singleton resume cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Highest server note id fully applied.
    pub last_sync_id: i64,
    /// When the watermark last moved (RFC 3339).
    pub last_sync_time: String,
}

impl SyncState {
    /// Creates a state for `last_sync_id` stamped now.
    pub fn at(last_sync_id: i64) -> Self {
        Self {
            last_sync_id,
            last_sync_time: now_rfc3339(),
        }
    }
}

/// One atomic unit of change: notes plus an optional new watermark.
///
/// Either every note and the watermark become durable together, or none do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Notes to insert or replace.
    pub notes: Vec<Note>,
    /// New watermark, if it moves.
    pub sync_state: Option<SyncState>,
}

impl Commit {
    /// Creates an empty commit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds notes.
    pub fn with_notes(mut self, notes: impl IntoIterator<Item = Note>) -> Self {
        self.notes.extend(notes);
        self
    }

    /// Sets the watermark.
    pub fn with_sync_state(mut self, state: SyncState) -> Self {
        self.sync_state = Some(state);
        self
    }

    /// Returns true if the commit changes nothing.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.sync_state.is_none()
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
