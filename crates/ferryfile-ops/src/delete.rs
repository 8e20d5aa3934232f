//! Ordered removal of scanned entries.

use std::fs;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferryfile_core::{CancelReason, FileFailure, OperationId, Phase, TransferError};
use ferryfile_scan::{EntryKind, ScannedEntry, ScannedItem};

use crate::progress::ProgressCounters;

/// Entries of `items` in removal order: every non-directory in walk order,
/// then directories deepest first.
pub fn removal_order<'a>(
    items: impl IntoIterator<Item = &'a ScannedItem>,
) -> (Vec<&'a ScannedEntry>, Vec<&'a ScannedEntry>) {
    let (mut dirs, files): (Vec<_>, Vec<_>) = items
        .into_iter()
        .flat_map(|item| item.entries.iter())
        .partition(|entry| entry.kind == EntryKind::Dir);
    // Stable sort keeps siblings in walk order.
    dirs.sort_by(|a, b| b.depth.cmp(&a.depth));
    (files, dirs)
}

/// Removes scanned entries, children before parents.
///
/// Only entries the scan saw are removed. Directories go through a
/// non-recursive `remove_dir`, so one that still holds anything (a child
/// that failed, or one created after the scan) stays.
pub(crate) struct Remover<'a> {
    pub id: OperationId,
    pub counters: &'a ProgressCounters,
    pub cancel: &'a CancellationToken,
    /// Advance to `Transferring`/`Finalizing` as files and dirs are removed.
    pub drive_phase: bool,
}

impl Remover<'_> {
    /// Remove every entry of `items`. Per-entry failures land in `failures`.
    pub fn remove<'i>(
        &self,
        items: impl IntoIterator<Item = &'i ScannedItem>,
        failures: &mut Vec<FileFailure>,
    ) -> Result<(), TransferError> {
        let (files, dirs) = removal_order(items);

        if self.drive_phase {
            self.counters.advance(Phase::Transferring);
        }
        for entry in files {
            self.checkpoint()?;
            self.counters.set_current(&entry.path);
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    debug!(operation_id = %self.id, path = %entry.path.display(), "Removed file");
                    self.counters.file_done(entry.size);
                }
                Err(e) => {
                    warn!(operation_id = %self.id, path = %entry.path.display(), error = %e, "Remove failed");
                    self.counters.file_done(0);
                    failures.push(FileFailure::io(&entry.path, &e));
                }
            }
        }

        if self.drive_phase {
            self.counters.advance(Phase::Finalizing);
        }
        for entry in dirs {
            self.checkpoint()?;
            self.counters.set_current(&entry.path);
            match fs::remove_dir(&entry.path) {
                Ok(()) => {
                    debug!(operation_id = %self.id, path = %entry.path.display(), "Removed directory");
                    self.counters.file_done(0);
                }
                Err(e) => {
                    warn!(operation_id = %self.id, path = %entry.path.display(), error = %e, "Remove failed");
                    self.counters.file_done(0);
                    failures.push(FileFailure::io(&entry.path, &e));
                }
            }
        }

        Ok(())
    }

    fn checkpoint(&self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled {
                reason: CancelReason::User,
            });
        }
        Ok(())
    }
}
