//! Applies inbound sync events to local storage.

use crate::error::{SyncError, SyncResult};
use keenotes_crypto::{EnvelopeCodec, Password};
use keenotes_storage::{Commit, Note, NoteStore, SyncState};
use keenotes_sync_protocol::{NotePayload, ServerMessage};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Content stored in place of a note whose envelope failed to open.
pub const DECRYPTION_FAILED_PLACEHOLDER: &str = "[Decryption failed]";

/// Typed events delivered from the receive loop, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A new connection was established and its handshake sent.
    SessionStarted,
    /// One page of a catch-up burst.
    Batch {
        /// 1-based batch number.
        batch_id: u32,
        /// Batches in this burst.
        total_batches: u32,
        /// Notes in this batch.
        notes: Vec<NotePayload>,
    },
    /// End of a catch-up burst.
    Complete {
        /// Notes sent during the burst.
        total_synced: u64,
        /// Server's authoritative watermark.
        last_sync_id: i64,
    },
    /// A note pushed live.
    Realtime(NotePayload),
    /// Protocol-level ping or pong.
    Heartbeat,
    /// The server reported an error.
    ServerError(String),
    /// The server acknowledged a posted note.
    NoteAck(i64),
}

impl InboundEvent {
    /// Converts a decoded frame; unknown frames yield `None`.
    pub fn from_server(message: ServerMessage) -> Option<Self> {
        Some(match message {
            ServerMessage::SyncBatch {
                batch_id,
                total_batches,
                notes,
            } => Self::Batch {
                batch_id,
                total_batches,
                notes,
            },
            ServerMessage::SyncComplete {
                total_synced,
                last_sync_id,
            } => Self::Complete {
                total_synced,
                last_sync_id,
            },
            ServerMessage::RealtimeUpdate { note } => Self::Realtime(note),
            ServerMessage::Ping | ServerMessage::Pong => Self::Heartbeat,
            ServerMessage::Error { message } => Self::ServerError(message),
            ServerMessage::NewNoteAck { id } => Self::NoteAck(id),
            ServerMessage::Unknown => return None,
        })
    }
}

/// Sync progress for UI feedback. Carries no correctness weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No burst in progress.
    Idle,
    /// Batches are arriving.
    Syncing,
    /// The last burst finished.
    Completed,
}

/// Counters about applied events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Batches committed.
    pub batches_applied: u64,
    /// Notes committed from batches and realtime updates.
    pub notes_applied: u64,
    /// Realtime updates committed.
    pub realtime_applied: u64,
    /// Notes stored with the decrypt-failure placeholder.
    pub decrypt_failures: u64,
    /// Bursts that reached `sync_complete`.
    pub bursts_completed: u64,
    /// Error frames received from the server.
    pub server_errors: u64,
    /// Last error seen, from either side.
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Burst {
    expected_batches: u32,
    received_batches: u32,
    // Set after a failed commit; later checkpoints in the same session would
    // skip the notes that failed to land.
    poisoned: bool,
}

/// Applies batches, completions and realtime notes to a [`NoteStore`].
///
/// # Invariants
///
/// - A batch and its watermark checkpoint are one atomic commit
/// - The watermark never decreases
/// - A note that fails to decrypt is stored with
///   [`DECRYPTION_FAILED_PLACEHOLDER`], never dropped
/// - After a failed commit nothing else is applied until the next session,
///   which resumes from the last durable watermark
pub struct SyncReconciler<S: NoteStore> {
    store: Arc<S>,
    codec: EnvelopeCodec,
    password: RwLock<Option<Password>>,
    burst: Mutex<Burst>,
    status: RwLock<SyncStatus>,
    stats: RwLock<SyncStats>,
}

impl<S: NoteStore> SyncReconciler<S> {
    /// Creates a reconciler over `store` with no password cached.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            codec: EnvelopeCodec::new(),
            password: RwLock::new(None),
            burst: Mutex::new(Burst::default()),
            status: RwLock::new(SyncStatus::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Uses a custom codec (for a fixed clock in tests).
    pub fn with_codec(mut self, codec: EnvelopeCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Caches the password used to open encrypted notes.
    pub fn set_password(&self, password: Option<Password>) {
        *self.password.write() = password;
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the current sync status.
    pub fn status(&self) -> SyncStatus {
        *self.status.read()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns `(expected, received)` batches for the current burst.
    pub fn burst_progress(&self) -> (u32, u32) {
        let burst = self.burst.lock();
        (burst.expected_batches, burst.received_batches)
    }

    /// Returns the durable watermark.
    pub fn last_sync_id(&self) -> SyncResult<i64> {
        Ok(self.store.last_sync_id()?)
    }

    /// Returns the persistent client id.
    pub fn client_id(&self) -> Uuid {
        self.store.client_id()
    }

    /// Applies one event. Blocking: decryption runs Argon2id.
    pub fn handle(&self, event: InboundEvent) -> SyncResult<()> {
        match event {
            InboundEvent::SessionStarted => {
                self.begin_session();
                Ok(())
            }
            InboundEvent::Batch {
                batch_id,
                total_batches,
                notes,
            } => self.apply_batch(batch_id, total_batches, notes),
            InboundEvent::Complete {
                total_synced,
                last_sync_id,
            } => self.complete(total_synced, last_sync_id),
            InboundEvent::Realtime(note) => self.apply_realtime(note),
            InboundEvent::Heartbeat => {
                debug!("heartbeat");
                Ok(())
            }
            InboundEvent::ServerError(message) => {
                warn!(%message, "server reported error");
                let mut stats = self.stats.write();
                stats.server_errors += 1;
                stats.last_error = Some(message);
                Ok(())
            }
            InboundEvent::NoteAck(id) => {
                debug!(id, "server acknowledged note");
                Ok(())
            }
        }
    }

    /// Resets burst tracking for a new connection.
    pub fn begin_session(&self) {
        *self.burst.lock() = Burst::default();
        *self.status.write() = SyncStatus::Idle;
    }

    /// Applies one `sync_batch`: decrypt, then commit notes and checkpoint
    /// together.
    pub fn apply_batch(
        &self,
        batch_id: u32,
        total_batches: u32,
        notes: Vec<NotePayload>,
    ) -> SyncResult<()> {
        {
            let mut burst = self.burst.lock();
            if burst.poisoned {
                debug!(batch_id, "skipping batch after failed commit");
                return Ok(());
            }
            if burst.expected_batches == 0 {
                burst.expected_batches = total_batches;
                info!(total_batches, "sync burst started");
            }
        }
        *self.status.write() = SyncStatus::Syncing;

        let current = self.store.last_sync_id()?;
        let watermark = notes.iter().map(|n| n.id).fold(current, i64::max);
        let count = notes.len() as u64;
        let stored = self.materialize(notes);

        let mut commit = Commit::new().with_notes(stored);
        if count > 0 {
            commit = commit.with_sync_state(SyncState::at(watermark));
        }
        self.commit(commit)?;

        let received = {
            let mut burst = self.burst.lock();
            burst.received_batches += 1;
            burst.received_batches
        };
        {
            let mut stats = self.stats.write();
            stats.batches_applied += 1;
            stats.notes_applied += count;
        }
        debug!(
            batch_id,
            total_batches,
            received,
            notes = count,
            last_sync_id = watermark,
            "applied sync batch"
        );
        Ok(())
    }

    /// Applies `sync_complete`.
    ///
    /// The server's watermark is adopted only if notes were synced, and
    /// never moves the local one backwards.
    pub fn complete(&self, total_synced: u64, last_sync_id: i64) -> SyncResult<()> {
        let (expected, received) = {
            let mut burst = self.burst.lock();
            if burst.poisoned {
                debug!("ignoring sync_complete after failed commit");
                return Ok(());
            }
            let progress = (burst.expected_batches, burst.received_batches);
            burst.expected_batches = 0;
            burst.received_batches = 0;
            progress
        };
        if received < expected {
            warn!(expected, received, "sync_complete before all batches arrived");
        }

        let current = self.store.last_sync_id()?;
        let mut watermark = current;
        if total_synced > 0 {
            if last_sync_id > current {
                self.commit(Commit::new().with_sync_state(SyncState::at(last_sync_id)))?;
                watermark = last_sync_id;
            } else if last_sync_id < current {
                debug!(
                    server = last_sync_id,
                    local = current,
                    "keeping local watermark ahead of server"
                );
            }
        }

        *self.status.write() = SyncStatus::Completed;
        self.stats.write().bursts_completed += 1;
        info!(total_synced, last_sync_id = watermark, "sync burst complete");
        Ok(())
    }

    /// Applies one `realtime_update`.
    pub fn apply_realtime(&self, note: NotePayload) -> SyncResult<()> {
        if self.burst.lock().poisoned {
            debug!(id = note.id, "skipping realtime note after failed commit");
            return Ok(());
        }

        let current = self.store.last_sync_id()?;
        let id = note.id;
        let mut commit = Commit::new().with_notes(self.materialize(vec![note]));
        if id > current {
            commit = commit.with_sync_state(SyncState::at(id));
        }
        self.commit(commit)?;

        let mut stats = self.stats.write();
        stats.realtime_applied += 1;
        stats.notes_applied += 1;
        debug!(id, "applied realtime note");
        Ok(())
    }

    fn commit(&self, commit: Commit) -> SyncResult<()> {
        self.store.commit(commit).map_err(|e| {
            self.burst.lock().poisoned = true;
            self.stats.write().last_error = Some(e.to_string());
            SyncError::from(e)
        })
    }

    fn materialize(&self, payloads: Vec<NotePayload>) -> Vec<Note> {
        // One password read per batch.
        let password = self.password.read().clone();
        let mut failures = 0u64;

        let notes = payloads
            .into_iter()
            .map(|payload| {
                let content = if !payload.encrypted {
                    payload.content
                } else if let Some(password) = &password {
                    match self.codec.decrypt_with_password(&payload.content, password) {
                        Ok(plaintext) => plaintext,
                        Err(e) => {
                            warn!(id = payload.id, error = %e, "failed to decrypt note");
                            failures += 1;
                            DECRYPTION_FAILED_PLACEHOLDER.to_string()
                        }
                    }
                } else {
                    warn!(id = payload.id, "no password set; storing encrypted note as received");
                    payload.content
                };
                Note::new(payload.id, content, payload.channel, payload.created_at)
            })
            .collect();

        if failures > 0 {
            self.stats.write().decrypt_failures += failures;
        }
        notes
    }
}
