//! Pre-flight checks run before an operation is accepted or mutates anything.

use std::fs;
use std::path::{Path, PathBuf};

use ferryfile_core::TransferError;

/// Every source must exist. Symlinks count even if dangling.
pub fn check_sources(sources: &[PathBuf]) -> Result<(), TransferError> {
    for source in sources {
        fs::symlink_metadata(source).map_err(|e| TransferError::io(source, &e))?;
    }
    Ok(())
}

/// Check a copy or move request and return the canonical destination.
///
/// Rejects a destination that is missing or not a directory, sources whose
/// parent is the destination, and directories moved or copied into
/// themselves.
pub fn check_transfer(sources: &[PathBuf], destination: &Path) -> Result<PathBuf, TransferError> {
    check_sources(sources)?;

    let metadata = fs::metadata(destination).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            TransferError::other(destination, "Destination directory does not exist")
        }
        _ => TransferError::io(destination, &e),
    })?;
    if !metadata.is_dir() {
        return Err(TransferError::other(
            destination,
            "Destination must be a directory",
        ));
    }
    let destination = destination
        .canonicalize()
        .map_err(|e| TransferError::io(destination, &e))?;

    for source in sources {
        let parent = source
            .parent()
            .and_then(|p| p.canonicalize().ok());
        if parent.as_deref() == Some(destination.as_path()) {
            return Err(TransferError::SameLocation {
                path: source.clone(),
            });
        }

        let is_dir = fs::symlink_metadata(source).is_ok_and(|m| m.is_dir());
        if is_dir
            && let Ok(canonical) = source.canonicalize()
            && destination.starts_with(&canonical)
        {
            return Err(TransferError::DestinationInsideSource {
                source_dir: source.clone(),
                destination,
            });
        }
    }

    Ok(destination)
}

/// Fail if the volume holding `destination` has less than `required` bytes
/// free.
#[cfg(unix)]
pub fn check_free_space(destination: &Path, required: u64) -> Result<(), TransferError> {
    let available = match nix::sys::statvfs::statvfs(destination) {
        Ok(stats) => (stats.blocks_available() as u64).saturating_mul(stats.fragment_size() as u64),
        Err(errno) => {
            tracing::warn!(path = %destination.display(), %errno, "Free space unknown");
            return Ok(());
        }
    };

    if available < required {
        return Err(TransferError::InsufficientSpace {
            path: destination.to_path_buf(),
            required,
            available,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_free_space(_destination: &Path, _required: u64) -> Result<(), TransferError> {
    Ok(())
}
