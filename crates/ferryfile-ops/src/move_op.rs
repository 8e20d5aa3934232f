//! Move: atomic rename on the same volume, staged copy-then-delete across
//! volumes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ferryfile_core::{
    ConflictDescriptor, ConflictResolution, OperationId, Phase, STAGING_PREFIX, TransferError,
    TransferEvent,
};
use ferryfile_scan::{ConflictScope, EntryKind, ScanResult, ScannedItem, distinct_sources};

use crate::conflict::unique_name;
use crate::copy::{Backup, copy_dir_times, create_dir, remove_existing};
use crate::delete::Remover;
use crate::executor::{Executor, Finished, contains, would_remove_source};
use crate::progress::ProgressCounters;
use crate::strategy::{MoveStrategy, plan_move};
use crate::validate::check_free_space;

/// Hidden directory under the destination that staged copies land in.
///
/// Removed with everything still in it when dropped.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    fn create(destination: &Path, id: OperationId) -> Result<Self, TransferError> {
        let path = destination.join(format!("{STAGING_PREFIX}{id}"));
        create_dir(&path)?;
        debug!(operation_id = %id, path = %path.display(), "Created staging directory");
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove staging directory");
        }
    }
}

/// Where a top-level item ends up once its conflict, if any, is settled.
struct Placement {
    target: PathBuf,
    /// Move what is at `target` aside until the item has taken its place.
    clear_existing: bool,
}

impl Executor {
    pub(crate) fn run_move(
        &mut self,
        sources: &[PathBuf],
        destination: &Path,
    ) -> Result<Finished, TransferError> {
        let sources = distinct_sources(sources, true);
        let plan = plan_move(self.volumes.as_ref(), &sources, destination);
        let staged: Vec<PathBuf> = plan
            .iter()
            .filter(|(_, strategy)| *strategy == MoveStrategy::Staged)
            .map(|(source, _)| source.clone())
            .collect();
        let renames = (plan.len() - staged.len()) as u64;
        let dry_run = self.handle.config().dry_run;
        let handle = Arc::clone(&self.handle);
        let counters = handle.progress();

        // Same-volume items are never scanned; each counts as one entry.
        let scan = if staged.is_empty() && !dry_run {
            counters.advance(Phase::Transferring);
            ScanResult::default()
        } else {
            let scope = if dry_run {
                ConflictScope::TopLevel
            } else {
                ConflictScope::None
            };
            self.scan(&staged, Some(destination), scope, renames)?
        };

        if dry_run {
            let mut scan = scan;
            let renamed = plan
                .iter()
                .filter(|(_, strategy)| *strategy == MoveStrategy::Rename)
                .map(|(source, _)| source.as_path());
            self.survey_renames(renamed, destination, &mut scan);
            counters.set_totals(scan.files_total, scan.dirs_total, scan.bytes_total);
            counters.set_conflicts(scan.conflicts_total);
            return Ok(Finished::Previewed(scan.into_dry_run()));
        }

        counters.set_totals(scan.files_total + renames, scan.dirs_total, scan.bytes_total);
        self.record_skipped(&scan);
        if !staged.is_empty() {
            if handle.config().check_free_space {
                check_free_space(destination, scan.bytes_total)?;
            }
            self.network = self.on_network(&staged, destination);
        }

        counters.advance(Phase::Transferring);
        let staging = if staged.is_empty() {
            None
        } else {
            Some(StagingDir::create(destination, handle.id())?)
        };
        let items: HashMap<&Path, &ScannedItem> = scan
            .items
            .iter()
            .map(|item| (item.source.as_path(), item))
            .collect();

        for (source, strategy) in &plan {
            self.checkpoint()?;
            match (strategy, &staging) {
                (MoveStrategy::Rename, _) => self.rename_item(source, destination)?,
                (MoveStrategy::Staged, Some(staging)) => {
                    // Sources the scan skipped are already reported.
                    if let Some(item) = items.get(source.as_path()) {
                        self.stage_item(item, destination, staging)?;
                    }
                }
                (MoveStrategy::Staged, None) => {}
            }
        }

        counters.advance(Phase::Finalizing);
        drop(staging);
        Ok(Finished::Transferred)
    }

    /// Move one item with a single rename.
    fn rename_item(&mut self, source: &Path, destination: &Path) -> Result<(), TransferError> {
        let handle = Arc::clone(&self.handle);
        let counters = handle.progress();
        counters.set_current(source);

        let Some(name) = source.file_name() else {
            self.fail(source, TransferError::other(source, "Source has no file name"));
            counters.file_done(0);
            return Ok(());
        };
        let Some(placement) = self.place(source, destination.join(name))? else {
            counters.file_done(0);
            return Ok(());
        };

        let result = replace(handle.id(), &placement, || {
            fs::rename(source, &placement.target).map_err(|e| TransferError::io(source, &e))
        });

        match result {
            Ok(()) => debug!(
                operation_id = %handle.id(),
                source = %source.display(),
                target = %placement.target.display(),
                "Renamed"
            ),
            Err(e) => self.fail(source, e),
        }
        counters.file_done(0);
        Ok(())
    }

    /// Copy one item into staging, promote it, then delete the source.
    ///
    /// An item with any failed entry is discarded and its source kept.
    fn stage_item(
        &mut self,
        item: &ScannedItem,
        destination: &Path,
        staging: &StagingDir,
    ) -> Result<(), TransferError> {
        let handle = Arc::clone(&self.handle);
        let counters = handle.progress();

        let Some(placement) = self.place(&item.source, destination.join(item.name()))? else {
            counters.add_files(item.files, item.bytes);
            return Ok(());
        };

        let copier = self.copier(&handle);
        let staged_root = staging.path().join(item.name());
        let mut copied = 0u64;
        let mut failed = false;
        let mut dirs: Vec<(&Path, PathBuf)> = Vec::new();

        for entry in &item.entries {
            self.checkpoint()?;
            let staged = staging.path().join(&entry.relative);
            match copier.copy(&entry.path, entry.kind, &staged) {
                Ok(_) if entry.kind == EntryKind::Dir => dirs.push((&entry.path, staged)),
                Ok(_) => {
                    counters.file_done(0);
                    copied += 1;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    self.fail(&entry.path, e);
                    failed = true;
                    break;
                }
            }
        }

        if failed {
            warn!(
                operation_id = %handle.id(),
                source = %item.source.display(),
                "Staged copy incomplete, source kept"
            );
            let _ = remove_existing(&staged_root);
            counters.add_files(item.files.saturating_sub(copied), 0);
            return Ok(());
        }

        copy_dir_times(dirs.iter().map(|(source, staged)| (*source, staged.as_path())));

        // Last point where cancelling leaves the destination untouched.
        self.checkpoint()?;

        let promoted = replace(handle.id(), &placement, || {
            fs::rename(&staged_root, &placement.target)
                .map_err(|e| TransferError::io(&placement.target, &e))
        });
        if let Err(e) = promoted {
            self.fail(&item.source, e);
            let _ = remove_existing(&staged_root);
            return Ok(());
        }
        info!(
            operation_id = %handle.id(),
            source = %item.source.display(),
            target = %placement.target.display(),
            "Promoted staged item"
        );

        // The copy is in place; finish removing the source even if a cancel
        // arrives now, and keep it out of the progress counters.
        let remover = Remover {
            id: handle.id(),
            counters: &ProgressCounters::default(),
            cancel: &CancellationToken::new(),
            drive_phase: false,
        };
        remover.remove([item], &mut self.failures)
    }

    /// Settle a top-level collision. `None` means the item is skipped.
    fn place(
        &mut self,
        source: &Path,
        target: PathBuf,
    ) -> Result<Option<Placement>, TransferError> {
        let Ok(existing) = fs::symlink_metadata(&target) else {
            return Ok(Some(Placement {
                target,
                clear_existing: false,
            }));
        };
        let source_meta = match fs::symlink_metadata(source) {
            Ok(m) => m,
            Err(e) => {
                self.fail(source, TransferError::io(source, &e));
                return Ok(None);
            }
        };

        let descriptor = ConflictDescriptor::from_metadata(source, &target, &source_meta, &existing);
        match self.decide(descriptor)? {
            ConflictResolution::Skip => Ok(None),
            ConflictResolution::Rename => Ok(Some(Placement {
                target: unique_name(&target),
                clear_existing: false,
            })),
            ConflictResolution::Overwrite => {
                if contains(&target, source) {
                    self.fail(source, would_remove_source(&target));
                    return Ok(None);
                }
                Ok(Some(Placement {
                    target,
                    // rename(2) replaces a file in place but not a directory.
                    clear_existing: existing.is_dir() || source_meta.is_dir(),
                }))
            }
            ConflictResolution::Cancel => Err(TransferError::Cancelled {
                reason: self.handle.cancel_reason(),
            }),
        }
    }

    /// Count same-volume items into a dry-run result and detect their
    /// top-level collisions.
    fn survey_renames<'a>(
        &self,
        sources: impl Iterator<Item = &'a Path>,
        destination: &Path,
        scan: &mut ScanResult,
    ) {
        let cap = self.handle.config().max_conflicts_to_show;
        for source in sources {
            scan.files_total += 1;
            let Some(name) = source.file_name() else {
                continue;
            };
            let Some(conflict) = ConflictDescriptor::detect(source, &destination.join(name)) else {
                continue;
            };

            scan.conflicts_total += 1;
            if scan.conflicts.len() < cap {
                self.sink.emit(TransferEvent::ScanConflict {
                    operation_id: self.handle.id(),
                    descriptor: conflict.clone(),
                });
                scan.conflicts.push(conflict);
            } else {
                scan.sampled = true;
            }
        }
    }
}

/// Put an item at its placement with `rename`, keeping any entry it replaces
/// until the rename has succeeded.
fn replace(
    id: OperationId,
    placement: &Placement,
    rename: impl FnOnce() -> Result<(), TransferError>,
) -> Result<(), TransferError> {
    let backup = if placement.clear_existing {
        Some(Backup::stash(id, &placement.target)?)
    } else {
        None
    };
    rename()?;
    if let Some(backup) = backup {
        backup.discard();
    }
    Ok(())
}
