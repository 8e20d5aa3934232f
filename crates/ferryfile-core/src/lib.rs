//! Core types for ferryfile.
//!
//! This crate holds the data shared by the scanner, the transfer engine and
//! the CLI: operation identifiers, per-operation configuration, the error
//! taxonomy, conflict descriptors, progress snapshots and the event stream.

mod config;
mod conflict;
mod error;
mod event;
mod operation;
mod progress;

pub use config::{ConflictPolicy, TransferConfig, TransferConfigBuilder};
pub use conflict::{ConflictDescriptor, ConflictResolution};
pub use error::{CancelReason, FileFailure, ScanWarning, TransferError, WarningKind};
pub use event::{DryRunResult, OperationState, OperationStatus, OperationSummary, TransferEvent};
pub use operation::{OperationId, OperationKind, Phase};
pub use progress::{ProgressSnapshot, display_name};

/// Prefix of the hidden directory a cross-device move stages its copy in.
pub const STAGING_PREFIX: &str = ".ferry-staging-";

/// Prefix of the temporary name a file is written under before it is renamed
/// into place.
pub const PARTIAL_PREFIX: &str = ".ferry-part-";

/// Prefix of the name an overwritten entry is kept under until its
/// replacement is in place.
pub const BACKUP_PREFIX: &str = ".ferry-backup-";

/// Whether a file name belongs to the engine's own bookkeeping.
///
/// Internal entries are never counted, listed or reported as conflicts.
pub fn is_internal_name(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| {
        [STAGING_PREFIX, PARTIAL_PREFIX, BACKUP_PREFIX]
            .iter()
            .any(|prefix| n.starts_with(prefix))
    })
}
