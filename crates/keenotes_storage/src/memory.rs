//! Note log held in memory.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::io;

/// A note log that never touches disk.
///
/// Backs throwaway stores and recovery tests: [`with_data`](Self::with_data)
/// replays arbitrary (possibly damaged) bytes, and
/// [`with_capacity_limit`](Self::with_capacity_limit) makes appends fail once
/// the log would outgrow a fixed size.
///
/// # Example
///
/// ```rust
/// use keenotes_storage::{InMemoryBackend, StorageBackend};
///
/// let mut log = InMemoryBackend::with_capacity_limit(8);
/// log.append_durable(b"12345").unwrap();
/// assert!(log.append_durable(b"6789").is_err());
/// assert_eq!(log.bytes(), b"12345");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Vec<u8>,
    limit: Option<usize>,
}

impl InMemoryBackend {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log holding `bytes`, as if read back after a crash.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self { bytes, limit: None }
    }

    /// Creates an empty log that refuses appends past `limit` bytes.
    #[must_use]
    pub fn with_capacity_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit: Some(limit),
        }
    }

    /// Returns the log contents.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the log, returning its contents.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn check_fits(&self, len: usize) -> StorageResult<()> {
        match self.limit {
            Some(limit) if len > limit => Err(StorageError::Io(io::Error::other(format!(
                "in-memory log limit of {limit} bytes reached"
            )))),
            _ => Ok(()),
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn append_durable(&mut self, frame: &[u8]) -> StorageResult<()> {
        self.check_fits(self.bytes.len() + frame.len())?;
        self.bytes.extend_from_slice(frame);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        let size = self.bytes.len() as u64;
        if len > size {
            return Err(StorageError::TruncateBeyondEnd { len, size });
        }
        self.bytes.truncate(len as usize);
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> StorageResult<()> {
        self.check_fits(contents.len())?;
        self.bytes = contents.to_vec();
        Ok(())
    }
}
