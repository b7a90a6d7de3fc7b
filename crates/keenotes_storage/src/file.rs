//! Note log on disk.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A note log kept in one file.
///
/// Appends are synced with `sync_all` before returning. [`replace`] writes
/// a `.compact` sibling, syncs it, renames it over the log and then syncs
/// the parent directory so the rename itself survives a crash.
///
/// [`replace`]: StorageBackend::replace
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_read_write(path, false)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Returns the log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_synced(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.size))?;
        self.file.write_all(frame)?;
        self.file.sync_all()
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut log = Vec::with_capacity(self.size as usize);
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        file.take(self.size).read_to_end(&mut log)?;
        Ok(log)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn append_durable(&mut self, frame: &[u8]) -> StorageResult<()> {
        if let Err(e) = self.write_synced(frame) {
            if let Err(cleanup) = self.file.set_len(self.size) {
                warn!(path = %self.path.display(), error = %cleanup, "failed to discard partial record");
            }
            return Err(e.into());
        }
        self.size += frame.len() as u64;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        if len > self.size {
            return Err(StorageError::TruncateBeyondEnd {
                len,
                size: self.size,
            });
        }
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.size = len;
        Ok(())
    }

    fn replace(&mut self, contents: &[u8]) -> StorageResult<()> {
        let staged_path = compaction_path(&self.path);
        let staged = open_read_write(&staged_path, true).and_then(|mut staged| {
            staged.write_all(contents)?;
            staged.sync_all()?;
            fs::rename(&staged_path, &self.path)?;
            Ok(staged)
        });
        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                if staged_path.is_file() {
                    let _ = fs::remove_file(&staged_path);
                }
                return Err(e.into());
            }
        };

        // The staged handle now names the log; the old inode is unlinked.
        self.file = staged;
        self.size = contents.len() as u64;
        sync_parent_dir(&self.path)?;
        Ok(())
    }
}

fn open_read_write(path: &Path, truncate: bool) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(truncate)
        .open(path)
}

/// Path of the staging file used while compacting `path`.
pub(crate) fn compaction_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".compact");
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
