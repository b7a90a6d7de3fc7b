//! # KeeNotes Storage
//!
//! Local persistent storage for synced notes and the sync watermark.
//!
//! This crate provides:
//! - [`StorageBackend`], the durable byte log under a store, with
//!   [`InMemoryBackend`] and [`FileBackend`]
//! - [`NoteStore`], the storage seam the sync reconciler writes through
//! - [`LogStore`], a `NoteStore` over an append-only, CRC-framed record log
//!
//! ## Key Invariants
//!
//! - A [`Commit`] (notes plus watermark) is durable as a unit before
//!   `commit` returns
//! - Notes are keyed by server id; re-delivery replaces, never duplicates
//! - A torn trailing record left by a crash is discarded on open
//! - Compaction swaps the log atomically, including the directory entry
//!
//! ## Example
//!
//! ```rust
//! use keenotes_storage::{Commit, LogStore, Note, NoteStore, SyncState};
//!
//! let store = LogStore::in_memory().unwrap();
//! store
//!     .commit(
//!         Commit::new()
//!             .with_notes([Note::new(101, "hello", "default", "2024-01-01 09:00:00")])
//!             .with_sync_state(SyncState::at(101)),
//!     )
//!     .unwrap();
//! assert_eq!(store.last_sync_id().unwrap(), 101);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod note;
mod record;
mod store;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use note::{Commit, Note, SyncState};
pub use record::{compute_crc32, LogRecord, LOG_MAGIC, LOG_VERSION};
pub use store::{LogStore, NoteStore};
