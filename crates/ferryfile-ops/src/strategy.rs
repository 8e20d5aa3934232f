//! Per-item transfer strategy selection.

use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use tracing::debug;

/// Tells which volume a path lives on.
pub trait VolumeInspector: Send + Sync + 'static {
    /// Opaque volume identifier. Symlinks are not followed.
    fn volume_id(&self, path: &Path) -> io::Result<u64>;

    fn same_volume(&self, a: &Path, b: &Path) -> io::Result<bool> {
        Ok(self.volume_id(a)? == self.volume_id(b)?)
    }

    /// Whether `path` is on a network filesystem (SMB, NFS, AFP, WebDAV).
    fn is_network(&self, _path: &Path) -> bool {
        false
    }
}

/// Volume inspector backed by `st_dev` and `statfs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataInspector;

impl VolumeInspector for MetadataInspector {
    fn volume_id(&self, path: &Path) -> io::Result<u64> {
        std::fs::symlink_metadata(path).map(|m| get_dev(&m))
    }

    fn is_network(&self, path: &Path) -> bool {
        is_network_filesystem(path)
    }
}

#[cfg(target_os = "linux")]
fn is_network_filesystem(path: &Path) -> bool {
    const NFS_SUPER_MAGIC: i64 = 0x6969;
    const SMB_SUPER_MAGIC: i64 = 0x517B;
    const CIFS_MAGIC_NUMBER: i64 = 0xFF53_4D42;
    const SMB2_MAGIC_NUMBER: i64 = 0xFE53_4D42;

    match nix::sys::statfs::statfs(path) {
        Ok(stat) => matches!(
            stat.filesystem_type().0 as i64,
            NFS_SUPER_MAGIC | SMB_SUPER_MAGIC | CIFS_MAGIC_NUMBER | SMB2_MAGIC_NUMBER
        ),
        Err(_) => false,
    }
}

#[cfg(any(target_vendor = "apple", target_os = "freebsd", target_os = "openbsd"))]
fn is_network_filesystem(path: &Path) -> bool {
    nix::sys::statfs::statfs(path).is_ok_and(|stat| {
        matches!(
            stat.filesystem_type_name(),
            "smbfs" | "nfs" | "afpfs" | "webdav"
        )
    })
}

#[cfg(not(any(
    target_os = "linux",
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "openbsd"
)))]
fn is_network_filesystem(_path: &Path) -> bool {
    false
}

/// Whether any of `paths` is on a network filesystem.
pub(crate) fn touches_network<'a>(
    volumes: &dyn VolumeInspector,
    paths: impl IntoIterator<Item = &'a Path>,
) -> bool {
    paths.into_iter().any(|path| {
        let network = volumes.is_network(path);
        if network {
            debug!(path = %path.display(), "Network filesystem, copying in chunks");
        }
        network
    })
}

/// Get the device ID from metadata.
#[cfg(unix)]
fn get_dev(metadata: &std::fs::Metadata) -> u64 {
    metadata.dev()
}

#[cfg(not(unix))]
fn get_dev(_metadata: &std::fs::Metadata) -> u64 {
    0 // No device ids; every path looks local
}

/// How a top-level item is moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStrategy {
    /// Same volume: one atomic rename.
    Rename,
    /// Different volume: copy into staging, promote, delete the source.
    Staged,
}

/// Pick a strategy for every top-level source of a move.
///
/// Sources that can't be inspected are staged; the copy path reports their
/// failure with full context.
pub fn plan_move(
    volumes: &dyn VolumeInspector,
    sources: &[PathBuf],
    destination: &Path,
) -> Vec<(PathBuf, MoveStrategy)> {
    let dest_volume = volumes.volume_id(destination).ok();
    sources
        .iter()
        .map(|source| {
            let strategy = match (volumes.volume_id(source).ok(), dest_volume) {
                (Some(src), Some(dst)) if src == dst => MoveStrategy::Rename,
                _ => MoveStrategy::Staged,
            };
            debug!(source = %source.display(), ?strategy, "Planned move");
            (source.clone(), strategy)
        })
        .collect()
}

/// How a regular file's bytes are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMethod {
    /// `std::fs::copy`, using kernel offload where available.
    Whole,
    /// Read/write loop checking cancellation between chunks.
    Chunked,
}

impl CopyMethod {
    /// Large files, and every file on a network filesystem, go through the
    /// cancellable loop.
    pub fn select(size: u64, chunked_threshold: u64, network: bool) -> Self {
        if network || size >= chunked_threshold {
            Self::Chunked
        } else {
            Self::Whole
        }
    }
}
