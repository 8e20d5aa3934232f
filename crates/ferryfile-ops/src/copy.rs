//! Byte-level copy primitives shared by copy and staged move.

use std::fs::{self, File, FileTimes, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferryfile_core::{BACKUP_PREFIX, CancelReason, OperationId, PARTIAL_PREFIX, TransferError};
use ferryfile_scan::EntryKind;

use crate::progress::ProgressCounters;
use crate::strategy::CopyMethod;

/// A file being written under a temporary name next to its target.
///
/// Dropped without `commit`, the temporary file is removed.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

/// `parent/<prefix><id>-<name>` next to `target`.
fn sibling(prefix: &str, id: OperationId, target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = target.parent().unwrap_or(Path::new(""));
    parent.join(format!("{prefix}{}-{name}", id.get()))
}

impl PartialFile {
    fn for_target(id: OperationId, target: &Path) -> Self {
        Self {
            path: sibling(PARTIAL_PREFIX, id, target),
            committed: false,
        }
    }

    /// Rename into place, replacing whatever file is at `target`.
    fn commit(mut self, target: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// An existing entry moved aside while its replacement is put in place.
///
/// Dropped without `discard`, it is renamed back to where it was.
pub(crate) struct Backup {
    path: PathBuf,
    target: PathBuf,
    discarded: bool,
}

impl Backup {
    /// Rename whatever is at `target` to a hidden name beside it.
    pub fn stash(id: OperationId, target: &Path) -> Result<Self, TransferError> {
        let path = sibling(BACKUP_PREFIX, id, target);
        fs::rename(target, &path).map_err(|e| TransferError::io(target, &e))?;
        debug!(operation_id = %id, target = %target.display(), "Moved existing entry aside");
        Ok(Self {
            path,
            target: target.to_path_buf(),
            discarded: false,
        })
    }

    /// The replacement is in place; remove the old entry for good.
    pub fn discard(mut self) {
        self.discarded = true;
        if let Err(e) = remove_existing(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove backup");
        }
    }
}

impl Drop for Backup {
    fn drop(&mut self) {
        if self.discarded {
            return;
        }
        // Never clobber something that appeared at the target meanwhile.
        if fs::symlink_metadata(&self.target).is_ok() {
            warn!(
                path = %self.path.display(),
                target = %self.target.display(),
                "Target reappeared, backup left in place"
            );
            return;
        }
        match fs::rename(&self.path, &self.target) {
            Ok(()) => debug!(target = %self.target.display(), "Restored existing entry"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to restore backup"),
        }
    }
}

/// Copies single entries for one operation, feeding its counters.
pub(crate) struct FileCopier<'a> {
    pub id: OperationId,
    pub counters: &'a ProgressCounters,
    pub cancel: &'a CancellationToken,
    pub chunked_threshold: u64,
    pub chunk_size: usize,
    /// Source or destination is on a network filesystem.
    pub network: bool,
}

impl FileCopier<'_> {
    /// Copy a file or symlink to `target` through a partial name.
    ///
    /// On success the copied bytes have been added to the counters and are
    /// returned. On failure or cancellation nothing is left under the target
    /// name that wasn't there before, and the counters are unchanged.
    pub fn copy(
        &self,
        source: &Path,
        kind: EntryKind,
        target: &Path,
    ) -> Result<u64, TransferError> {
        self.counters.set_current(source);
        match kind {
            EntryKind::Symlink => self.copy_symlink(source, target),
            EntryKind::File => self.copy_file(source, target),
            EntryKind::Dir => {
                create_dir(target)?;
                Ok(0)
            }
        }
    }

    fn copy_file(&self, source: &Path, target: &Path) -> Result<u64, TransferError> {
        let metadata = fs::metadata(source).map_err(|e| TransferError::io(source, &e))?;
        let size = metadata.len();
        let partial = PartialFile::for_target(self.id, target);

        let copied = match CopyMethod::select(size, self.chunked_threshold, self.network) {
            CopyMethod::Whole => {
                let copied =
                    fs::copy(source, &partial.path).map_err(|e| TransferError::io(source, &e))?;
                self.counters.add_bytes(copied);
                copied
            }
            CopyMethod::Chunked => {
                let copied = self.copy_chunked(source, &partial.path)?;
                // Permissions come along with fs::copy only.
                if let Err(e) = fs::set_permissions(&partial.path, metadata.permissions()) {
                    self.counters.sub_bytes(copied);
                    return Err(TransferError::io(&partial.path, &e));
                }
                copied
            }
        };

        if let Err(e) = copy_times(&metadata, &partial.path) {
            warn!(path = %partial.path.display(), error = %e, "Failed to keep timestamps");
        }

        if let Err(e) = partial.commit(target) {
            self.counters.sub_bytes(copied);
            return Err(TransferError::io(target, &e));
        }

        debug!(operation_id = %self.id, source = %source.display(), bytes = copied, "Copied file");
        Ok(copied)
    }

    /// Read/write loop that checks cancellation before every chunk.
    fn copy_chunked(&self, source: &Path, partial: &Path) -> Result<u64, TransferError> {
        let mut written = 0u64;
        let result = self.chunk_loop(source, partial, &mut written);
        if result.is_err() {
            self.counters.sub_bytes(written);
        }
        result.map(|()| written)
    }

    fn chunk_loop(
        &self,
        source: &Path,
        partial: &Path,
        written: &mut u64,
    ) -> Result<(), TransferError> {
        let mut reader = File::open(source).map_err(|e| TransferError::io(source, &e))?;
        let mut writer = File::create(partial).map_err(|e| TransferError::io(partial, &e))?;
        let mut buffer = vec![0u8; self.chunk_size.max(1)];

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled {
                    reason: CancelReason::User,
                });
            }
            let n = reader
                .read(&mut buffer)
                .map_err(|e| TransferError::io(source, &e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buffer[..n])
                .map_err(|e| TransferError::io(partial, &e))?;
            *written += n as u64;
            self.counters.add_bytes(n as u64);
        }

        writer.sync_all().map_err(|e| TransferError::io(partial, &e))
    }

    #[cfg(unix)]
    fn copy_symlink(&self, source: &Path, target: &Path) -> Result<u64, TransferError> {
        let link = fs::read_link(source).map_err(|e| TransferError::io(source, &e))?;
        let size = fs::symlink_metadata(source).map(|m| m.len()).unwrap_or(0);
        let partial = PartialFile::for_target(self.id, target);
        std::os::unix::fs::symlink(&link, &partial.path)
            .map_err(|e| TransferError::io(&partial.path, &e))?;
        partial
            .commit(target)
            .map_err(|e| TransferError::io(target, &e))?;
        self.counters.add_bytes(size);
        Ok(size)
    }

    #[cfg(not(unix))]
    fn copy_symlink(&self, source: &Path, _target: &Path) -> Result<u64, TransferError> {
        Err(TransferError::other(source, "Copying symlinks is not supported on this platform"))
    }
}

/// Create a directory, accepting one that already exists.
pub(crate) fn create_dir(path: &Path) -> Result<(), TransferError> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(TransferError::io(path, &e)),
    }
}

/// Give `target` the access and modification times of `source`.
fn copy_times(source: &Metadata, target: &Path) -> io::Result<()> {
    let mut times = FileTimes::new();
    if let Ok(accessed) = source.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Ok(modified) = source.modified() {
        times = times.set_modified(modified);
    }
    let file = if source.is_dir() {
        File::open(target)?
    } else {
        File::options().write(true).open(target)?
    };
    file.set_times(times)
}

/// Give each created directory its source's times, deepest first.
///
/// Run once a directory's contents are in place; writing into it afterwards
/// would bump its modification time again.
pub(crate) fn copy_dir_times<'a>(dirs: impl DoubleEndedIterator<Item = (&'a Path, &'a Path)>) {
    for (source, target) in dirs.rev() {
        let result = fs::metadata(source).and_then(|metadata| copy_times(&metadata, target));
        if let Err(e) = result {
            warn!(path = %target.display(), error = %e, "Failed to keep directory timestamps");
        }
    }
}

/// Remove whatever is at `path`, recursively for directories.
pub(crate) fn remove_existing(path: &Path) -> Result<(), TransferError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| TransferError::io(path, &e))?;
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| TransferError::io(path, &e))
}
