//! Error types for transfer operations.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Why an operation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum CancelReason {
    /// A caller asked for it.
    User,
    /// A conflict went unanswered past the configured timeout.
    ConflictTimeout,
}

/// Errors a transfer can end with, or record against a single file.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TransferError {
    /// Source path does not exist.
    #[error("Source not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// Destination already exists.
    #[error("Destination already exists: {path}")]
    DestinationExists { path: PathBuf },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf, message: String },

    /// Not enough free space on the destination volume.
    #[error("Not enough space at {path}: {required} bytes required, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    /// Source and destination resolve to the same location.
    #[error("Source and destination are the same: {path}")]
    SameLocation { path: PathBuf },

    /// Destination lies inside the source directory.
    #[error("Cannot transfer {source_dir} into its own subdirectory {destination}")]
    DestinationInsideSource {
        source_dir: PathBuf,
        destination: PathBuf,
    },

    /// Too many levels of symbolic links.
    #[error("Symlink loop at {path}")]
    SymlinkLoop { path: PathBuf },

    /// Operation was cancelled.
    #[error("Operation cancelled ({reason})")]
    Cancelled { reason: CancelReason },

    /// Generic I/O error.
    #[serde(rename = "ioError")]
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl TransferError {
    /// Create an error from an I/O failure with path context.
    pub fn io(path: impl Into<PathBuf>, source: &io::Error) -> Self {
        let path = path.into();
        if is_symlink_loop(source) {
            return Self::SymlinkLoop { path };
        }
        match source.kind() {
            io::ErrorKind::NotFound => Self::SourceNotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path,
                message: source.to_string(),
            },
            io::ErrorKind::AlreadyExists => Self::DestinationExists { path },
            _ => Self::Io {
                path,
                message: source.to_string(),
            },
        }
    }

    /// Create a generic error with a free-form message.
    pub fn other(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error rejects the whole request before any mutation.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::SameLocation { .. }
                | Self::DestinationInsideSource { .. }
                | Self::InsufficientSpace { .. }
        )
    }

    /// Whether this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Path the error is about, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::SourceNotFound { path }
            | Self::DestinationExists { path }
            | Self::PermissionDenied { path, .. }
            | Self::InsufficientSpace { path, .. }
            | Self::SameLocation { path }
            | Self::SymlinkLoop { path }
            | Self::Io { path, .. } => Some(path),
            Self::DestinationInsideSource { destination, .. } => Some(destination),
            Self::Cancelled { .. } => None,
        }
    }
}

#[cfg(unix)]
fn is_symlink_loop(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::ELOOP as i32)
}

#[cfg(not(unix))]
fn is_symlink_loop(_err: &io::Error) -> bool {
    false
}

/// A per-file failure that did not stop the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    /// Path that failed.
    pub path: PathBuf,
    /// What went wrong.
    pub error: TransferError,
}

impl FileFailure {
    pub fn new(path: impl Into<PathBuf>, error: TransferError) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }

    /// Record an I/O failure against a path.
    pub fn io(path: impl Into<PathBuf>, source: &io::Error) -> Self {
        let path = path.into();
        let error = TransferError::io(&path, source);
        Self { path, error }
    }
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Entry disappeared between listing and stat.
    Vanished,
    /// Error reading a directory.
    ReadError,
    /// Error reading metadata.
    MetadataError,
    /// FIFO, socket or device node.
    SpecialFile,
}

/// An entry the scanner skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a warning from an I/O error, classified by kind.
    pub fn from_io(path: impl Into<PathBuf>, error: &io::Error) -> Self {
        let path = path.into();
        let kind = match error.kind() {
            io::ErrorKind::PermissionDenied => WarningKind::PermissionDenied,
            io::ErrorKind::NotFound => WarningKind::Vanished,
            _ => WarningKind::ReadError,
        };
        Self {
            message: format!("{error}"),
            path,
            kind,
        }
    }

    /// Create a special file warning.
    pub fn special_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            message: format!("Special file skipped: {}", path.display()),
            path,
            kind: WarningKind::SpecialFile,
        }
    }
}
