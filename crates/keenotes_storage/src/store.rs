//! The note store: an in-memory index rebuilt from an append-only log.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use crate::note::{Commit, Note, SyncState};
use crate::record::{decode_frame, Decoded, LogRecord};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Local persistent storage as seen by the sync reconciler.
///
/// # Invariants
///
/// - `commit` is atomic: its notes and watermark are durable together or
///   not at all, and durable before it returns
/// - Notes are keyed by id; re-delivery replaces in place
/// - The watermark only changes through `commit`, `reset_sync_state` and
///   `delete_all`
pub trait NoteStore: Send + Sync {
    /// Applies a commit atomically.
    fn commit(&self, commit: Commit) -> StorageResult<()>;

    /// Returns the note with `id`.
    fn get(&self, id: i64) -> StorageResult<Option<Note>>;

    /// Returns up to `limit` notes, newest id first.
    fn list_recent(&self, limit: usize) -> StorageResult<Vec<Note>>;

    /// Case-insensitive substring search over content and channel, newest
    /// id first.
    fn search(&self, query: &str, limit: usize) -> StorageResult<Vec<Note>>;

    /// Returns the number of stored notes.
    fn count(&self) -> StorageResult<usize>;

    /// Returns the watermark, if one has been recorded.
    fn sync_state(&self) -> StorageResult<Option<SyncState>>;

    /// Returns the resume point for the next handshake, `0` when none.
    fn last_sync_id(&self) -> StorageResult<i64> {
        Ok(self.sync_state()?.map_or(0, |s| s.last_sync_id))
    }

    /// Removes every note, optionally clearing the watermark too.
    fn delete_all(&self, reset_sync_state: bool) -> StorageResult<()>;

    /// Clears the watermark so the next sync starts from zero.
    fn reset_sync_state(&self) -> StorageResult<()>;

    /// Returns the persistent client id.
    fn client_id(&self) -> Uuid;
}

#[derive(Debug, Default)]
struct Index {
    notes: BTreeMap<i64, Note>,
    sync_state: Option<SyncState>,
    client_id: Option<Uuid>,
}

impl Index {
    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::Identity { client_id } => self.client_id = Some(client_id),
            LogRecord::Commit { notes, sync_state } => {
                for note in notes {
                    self.notes.insert(note.id, note);
                }
                if sync_state.is_some() {
                    self.sync_state = sync_state;
                }
            }
            LogRecord::ResetSyncState => self.sync_state = None,
            LogRecord::DeleteAll { reset_sync_state } => {
                self.notes.clear();
                if reset_sync_state {
                    self.sync_state = None;
                }
            }
            LogRecord::Snapshot {
                client_id,
                notes,
                sync_state,
            } => {
                self.client_id = Some(client_id);
                self.notes = notes.into_iter().map(|n| (n.id, n)).collect();
                self.sync_state = sync_state;
            }
        }
    }

    fn newest_first(&self, limit: usize, keep: impl Fn(&Note) -> bool) -> Vec<Note> {
        self.notes
            .values()
            .rev()
            .filter(|n| keep(n))
            .take(limit)
            .cloned()
            .collect()
    }
}

struct Inner<B> {
    backend: B,
    index: Index,
}

/// A [`NoteStore`] over an append-only record log.
///
/// Every mutation is one framed record, synced before the call returns. On
/// open the log is replayed into memory; a torn trailing record is cut off.
pub struct LogStore<B: StorageBackend> {
    inner: Mutex<Inner<B>>,
    client_id: Uuid,
}

impl LogStore<InMemoryBackend> {
    /// Creates an empty store that lives only in memory.
    pub fn in_memory() -> StorageResult<Self> {
        Self::with_backend(InMemoryBackend::new())
    }
}

impl LogStore<FileBackend> {
    /// Opens or creates the log file at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::with_backend(FileBackend::open(path)?)
    }
}

impl<B: StorageBackend> LogStore<B> {
    /// Opens a store over `backend`, replaying whatever it already holds.
    pub fn with_backend(mut backend: B) -> StorageResult<Self> {
        let mut index = replay(&mut backend)?;

        let client_id = match index.client_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                append_durably(&mut backend, &LogRecord::Identity { client_id: id })?;
                index.client_id = Some(id);
                info!(client_id = %id, "created note log");
                id
            }
        };

        Ok(Self {
            inner: Mutex::new(Inner { backend, index }),
            client_id,
        })
    }

    /// Rewrites the log as a single snapshot record.
    ///
    /// The backend swaps the log atomically, so a crash leaves either the
    /// old log or the snapshot.
    pub fn compact(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let snapshot = LogRecord::Snapshot {
            client_id: self.client_id,
            notes: inner.index.notes.values().cloned().collect(),
            sync_state: inner.index.sync_state.clone(),
        }
        .encode()?;

        let before = inner.backend.size()?;
        inner.backend.replace(&snapshot)?;
        info!(
            before,
            after = snapshot.len(),
            notes = inner.index.notes.len(),
            "compacted note log"
        );
        Ok(())
    }

    /// Returns the backend, consuming the store.
    pub fn into_backend(self) -> B {
        self.inner.into_inner().backend
    }

    fn write(&self, record: LogRecord) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        append_durably(&mut inner.backend, &record)?;
        inner.index.apply(record);
        Ok(())
    }
}

fn replay<B: StorageBackend>(backend: &mut B) -> StorageResult<Index> {
    let log = backend.read_all()?;
    let size = log.len() as u64;

    let mut index = Index::default();
    let mut offset = 0usize;
    let mut records = 0usize;
    while offset < log.len() {
        match decode_frame(&log[offset..], offset as u64)? {
            Decoded::Record(record, len) => {
                index.apply(record);
                offset += len;
                records += 1;
            }
            Decoded::Torn => break,
        }
    }

    if (offset as u64) < size {
        warn!(
            offset,
            discarded = size - offset as u64,
            "truncating torn record at end of note log"
        );
        backend.truncate(offset as u64)?;
    }

    debug!(records, notes = index.notes.len(), "replayed note log");
    Ok(index)
}

fn append_durably<B: StorageBackend>(backend: &mut B, record: &LogRecord) -> StorageResult<()> {
    backend.append_durable(&record.encode()?)
}

impl<B: StorageBackend> NoteStore for LogStore<B> {
    fn commit(&self, commit: Commit) -> StorageResult<()> {
        if commit.is_empty() {
            return Ok(());
        }
        let Commit { notes, sync_state } = commit;
        self.write(LogRecord::Commit { notes, sync_state })
    }

    fn get(&self, id: i64) -> StorageResult<Option<Note>> {
        Ok(self.inner.lock().index.notes.get(&id).cloned())
    }

    fn list_recent(&self, limit: usize) -> StorageResult<Vec<Note>> {
        Ok(self.inner.lock().index.newest_first(limit, |_| true))
    }

    fn search(&self, query: &str, limit: usize) -> StorageResult<Vec<Note>> {
        let needle = query.to_lowercase();
        Ok(self.inner.lock().index.newest_first(limit, move |n| {
            n.content.to_lowercase().contains(&needle) || n.channel.to_lowercase().contains(&needle)
        }))
    }

    fn count(&self) -> StorageResult<usize> {
        Ok(self.inner.lock().index.notes.len())
    }

    fn sync_state(&self) -> StorageResult<Option<SyncState>> {
        Ok(self.inner.lock().index.sync_state.clone())
    }

    fn delete_all(&self, reset_sync_state: bool) -> StorageResult<()> {
        self.write(LogRecord::DeleteAll { reset_sync_state })
    }

    fn reset_sync_state(&self) -> StorageResult<()> {
        self.write(LogRecord::ResetSyncState)
    }

    fn client_id(&self) -> Uuid {
        self.client_id
    }
}

impl<B: StorageBackend> std::fmt::Debug for LogStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: i64, content: &str) -> Note {
        Note::new(id, content, "default", "2024-01-01 00:00:00")
    }

    #[test]
    fn redelivery_replaces_in_place() {
        let store = LogStore::in_memory().unwrap();
        store
            .commit(Commit::new().with_notes([note(1, "first")]))
            .unwrap();
        store
            .commit(Commit::new().with_notes([note(1, "second")]))
            .unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(1).unwrap().unwrap().content, "second");
    }

    #[test]
    fn commit_without_watermark_keeps_existing() {
        let store = LogStore::in_memory().unwrap();
        store
            .commit(Commit::new().with_sync_state(SyncState::at(10)))
            .unwrap();
        store
            .commit(Commit::new().with_notes([note(11, "x")]))
            .unwrap();
        assert_eq!(store.last_sync_id().unwrap(), 10);
    }

    #[test]
    fn list_and_search_newest_first() {
        let store = LogStore::in_memory().unwrap();
        store
            .commit(Commit::new().with_notes([
                note(1, "Buy milk"),
                note(2, "call mom"),
                note(3, "MILK again"),
            ]))
            .unwrap();

        let ids: Vec<_> = store.list_recent(2).unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 2]);

        let ids: Vec<_> = store.search("milk", 10).unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 1]);

        assert!(store.search("default", 10).unwrap().len() == 3);
    }

    #[test]
    fn delete_all_and_reset() {
        let store = LogStore::in_memory().unwrap();
        store
            .commit(
                Commit::new()
                    .with_notes([note(5, "x")])
                    .with_sync_state(SyncState::at(5)),
            )
            .unwrap();

        store.delete_all(false).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.last_sync_id().unwrap(), 5);

        store.reset_sync_state().unwrap();
        assert_eq!(store.sync_state().unwrap(), None);
        assert_eq!(store.last_sync_id().unwrap(), 0);
    }

    #[test]
    fn empty_commit_writes_nothing() {
        let store = LogStore::in_memory().unwrap();
        let backend = store.into_backend();
        let size = backend.size().unwrap();

        let store = LogStore::with_backend(backend).unwrap();
        store.commit(Commit::new()).unwrap();
        assert_eq!(store.into_backend().size().unwrap(), size);
    }

    #[test]
    fn failed_commit_leaves_index_and_log_untouched() {
        let store = LogStore::with_backend(InMemoryBackend::with_capacity_limit(400)).unwrap();
        store
            .commit(
                Commit::new()
                    .with_notes([note(1, "fits")])
                    .with_sync_state(SyncState::at(1)),
            )
            .unwrap();

        let too_big = Commit::new()
            .with_notes((2..=20).map(|id| note(id, "does not fit")))
            .with_sync_state(SyncState::at(20));
        assert!(store.commit(too_big).is_err());
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.last_sync_id().unwrap(), 1);

        let replayed = LogStore::with_backend(InMemoryBackend::with_data(
            store.into_backend().into_bytes(),
        ))
        .unwrap();
        assert_eq!(replayed.count().unwrap(), 1);
        assert_eq!(replayed.last_sync_id().unwrap(), 1);
    }

    #[test]
    fn compaction_in_memory_preserves_state() {
        let store = LogStore::in_memory().unwrap();
        for _ in 0..3 {
            store
                .commit(
                    Commit::new()
                        .with_notes([note(1, "a"), note(2, "b")])
                        .with_sync_state(SyncState::at(2)),
                )
                .unwrap();
        }
        let client_id = store.client_id();
        store.compact().unwrap();

        let replayed = LogStore::with_backend(store.into_backend()).unwrap();
        assert_eq!(replayed.client_id(), client_id);
        assert_eq!(replayed.count().unwrap(), 2);
        assert_eq!(replayed.last_sync_id().unwrap(), 2);
    }
}
