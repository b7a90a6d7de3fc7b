//! The byte log underneath a [`LogStore`](crate::LogStore).

use crate::error::StorageResult;

/// Durable, append-only bytes holding framed log records.
///
/// Backends never interpret the records; framing and replay belong to the
/// store.
///
/// # Invariants
///
/// - A successful `append_durable` is on stable storage when it returns
/// - A failed `append_durable` leaves the log at its previous length
/// - `replace` swaps the whole log atomically: readers after a crash see
///   either the old contents or the new ones
pub trait StorageBackend: Send + Sync {
    /// Reads the whole log.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Returns the log length in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Appends one framed record and syncs it.
    fn append_durable(&mut self, frame: &[u8]) -> StorageResult<()>;

    /// Cuts the log back to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TruncateBeyondEnd`](crate::StorageError::TruncateBeyondEnd)
    /// if `len` is past the current end.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;

    /// Replaces the whole log with `contents`.
    fn replace(&mut self, contents: &[u8]) -> StorageResult<()>;
}
