//! Blocking executor running one operation from scan to finish.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use ferryfile_core::{
    CancelReason, ConflictDescriptor, ConflictResolution, DryRunResult, FileFailure,
    OperationKind, Phase, TransferError, TransferEvent,
};
use ferryfile_scan::{
    ConflictScope, EntryKind, ScanObserver, ScanOptions, ScanProgress, ScanResult, ScannedEntry,
    ScannedItem, Scanner,
};

use crate::conflict::{Decision, unique_name};
use crate::copy::{Backup, FileCopier, copy_dir_times};
use crate::delete::Remover;
use crate::operation::OperationHandle;
use crate::progress::ProgressCounters;
use crate::sink::EventSink;
use crate::strategy::{VolumeInspector, touches_network};
use crate::validate::check_free_space;

/// A file operation to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperation {
    /// Copy files/directories into a destination directory.
    Copy {
        sources: Vec<PathBuf>,
        destination: PathBuf,
    },
    /// Move files/directories into a destination directory.
    Move {
        sources: Vec<PathBuf>,
        destination: PathBuf,
    },
    /// Delete files/directories.
    Delete { sources: Vec<PathBuf> },
}

impl FileOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Copy { .. } => OperationKind::Copy,
            Self::Move { .. } => OperationKind::Move,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn sources(&self) -> &[PathBuf] {
        match self {
            Self::Copy { sources, .. } | Self::Move { sources, .. } | Self::Delete { sources } => {
                sources
            }
        }
    }
}

/// How an operation ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    Completed {
        files_processed: u64,
        bytes_processed: u64,
        failures: Vec<FileFailure>,
    },
    Previewed(DryRunResult),
    Failed(TransferError),
    Cancelled {
        files_processed: u64,
        reason: CancelReason,
    },
}

/// Successful end of a run, before it becomes an `Outcome`.
pub(crate) enum Finished {
    Transferred,
    Previewed(DryRunResult),
}

/// Runs an operation on a blocking thread.
pub(crate) struct Executor {
    pub(crate) handle: Arc<OperationHandle>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) volumes: Arc<dyn VolumeInspector>,
    pub(crate) failures: Vec<FileFailure>,
    /// Copies touch a network filesystem and always go chunk by chunk.
    pub(crate) network: bool,
}

impl Executor {
    pub fn new(
        handle: Arc<OperationHandle>,
        sink: Arc<dyn EventSink>,
        volumes: Arc<dyn VolumeInspector>,
    ) -> Self {
        Self {
            handle,
            sink,
            volumes,
            failures: Vec::new(),
            network: false,
        }
    }

    pub fn run(mut self, operation: FileOperation) -> Outcome {
        let result = match &operation {
            FileOperation::Copy {
                sources,
                destination,
            } => self.run_copy(sources, destination),
            FileOperation::Move {
                sources,
                destination,
            } => self.run_move(sources, destination),
            FileOperation::Delete { sources } => self.run_delete(sources),
        };

        // From here on a cancel is refused; one accepted before wins.
        let cancel_accepted = self.handle.seal();
        let counters = self.handle.progress();
        match result {
            _ if cancel_accepted => Outcome::Cancelled {
                files_processed: counters.files_done(),
                reason: self.handle.cancel_reason(),
            },
            Ok(Finished::Transferred) => Outcome::Completed {
                files_processed: counters.files_done(),
                bytes_processed: counters.bytes_done(),
                failures: self.failures,
            },
            Ok(Finished::Previewed(preview)) => Outcome::Previewed(preview),
            Err(e) if e.is_cancelled() => Outcome::Cancelled {
                files_processed: counters.files_done(),
                reason: self.handle.cancel_reason(),
            },
            Err(e) => Outcome::Failed(e),
        }
    }

    fn run_copy(&mut self, sources: &[PathBuf], destination: &Path) -> Result<Finished, TransferError> {
        let dry_run = self.handle.config().dry_run;
        // A real copy checks conflicts entry by entry while transferring.
        let scope = if dry_run {
            ConflictScope::Recursive
        } else {
            ConflictScope::None
        };
        let scan = self.scan(sources, Some(destination), scope, 0)?;

        let handle = Arc::clone(&self.handle);
        let counters = handle.progress();
        counters.set_totals(scan.files_total, scan.dirs_total, scan.bytes_total);
        if dry_run {
            return Ok(Finished::Previewed(scan.into_dry_run()));
        }

        self.record_skipped(&scan);
        if handle.config().check_free_space {
            check_free_space(destination, scan.bytes_total)?;
        }
        self.network = self.on_network(sources, destination);

        counters.advance(Phase::Transferring);
        for item in &scan.items {
            self.copy_item(item, destination)?;
        }
        counters.advance(Phase::Finalizing);

        Ok(Finished::Transferred)
    }

    /// Copy one top-level item entry by entry, resolving collisions as they
    /// come up.
    fn copy_item(&mut self, item: &ScannedItem, destination: &Path) -> Result<(), TransferError> {
        let handle = Arc::clone(&self.handle);
        let copier = self.copier(&handle);
        let counters = handle.progress();

        // Where each copied directory actually landed, by relative path.
        let mut landed: HashMap<&Path, PathBuf> = HashMap::new();
        // Directories this copy created, in walk order.
        let mut created: Vec<(&Path, PathBuf)> = Vec::new();
        let mut dropped: Option<&Path> = None;

        for entry in &item.entries {
            self.checkpoint()?;

            if let Some(dir) = dropped
                && entry.relative.starts_with(dir)
            {
                pass_over(counters, entry);
                continue;
            }

            let mut backup: Option<Backup> = None;
            let mut merging = false;

            let mut target = match entry.relative.parent().and_then(|p| landed.get(p)) {
                Some(parent) => parent.join(entry.relative.file_name().unwrap_or_default()),
                None => destination.join(&entry.relative),
            };

            if let Ok(existing) = fs::symlink_metadata(&target) {
                merging = entry.kind == EntryKind::Dir && existing.is_dir();
                if !merging {
                    let source_meta = match fs::symlink_metadata(&entry.path) {
                        Ok(m) => m,
                        Err(e) => {
                            self.fail_entry(entry, TransferError::io(&entry.path, &e));
                            give_up(counters, entry);
                            dropped = dir_of(entry);
                            continue;
                        }
                    };
                    let descriptor =
                        ConflictDescriptor::from_metadata(&entry.path, &target, &source_meta, &existing);

                    match self.decide(descriptor)? {
                        ConflictResolution::Skip => {
                            debug!(operation_id = %handle.id(), path = %target.display(), "Skipped conflict");
                            pass_over(counters, entry);
                            dropped = dir_of(entry);
                            continue;
                        }
                        ConflictResolution::Rename => target = unique_name(&target),
                        ConflictResolution::Overwrite => {
                            // A file replaces a file on rename; anything else
                            // is moved aside until its replacement exists.
                            if existing.is_dir() || entry.kind == EntryKind::Dir {
                                let stashed = if contains(&target, &entry.path) {
                                    Err(would_remove_source(&target))
                                } else {
                                    Backup::stash(handle.id(), &target)
                                };
                                match stashed {
                                    Ok(stashed) => backup = Some(stashed),
                                    Err(e) => {
                                        self.fail_entry(entry, e);
                                        give_up(counters, entry);
                                        dropped = dir_of(entry);
                                        continue;
                                    }
                                }
                            }
                        }
                        ConflictResolution::Cancel => {
                            return Err(TransferError::Cancelled {
                                reason: CancelReason::User,
                            });
                        }
                    }
                }
            }

            // A failed copy drops the backup, which puts the old entry back.
            match copier.copy(&entry.path, entry.kind, &target) {
                Ok(_) => {
                    if let Some(backup) = backup.take() {
                        backup.discard();
                    }
                    if entry.kind == EntryKind::Dir {
                        if !merging {
                            created.push((&entry.path, target.clone()));
                        }
                        landed.insert(&entry.relative, target);
                    } else {
                        counters.file_done(0);
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    self.fail_entry(entry, e);
                    give_up(counters, entry);
                    dropped = dir_of(entry);
                }
            }
        }

        copy_dir_times(created.iter().map(|(source, target)| (*source, target.as_path())));
        Ok(())
    }

    fn run_delete(&mut self, sources: &[PathBuf]) -> Result<Finished, TransferError> {
        let scan = self.scan(sources, None, ConflictScope::None, 0)?;

        // Every removed entry counts, directories included.
        let entries = scan.files_total + scan.dirs_total;
        let counters = self.handle.progress();
        counters.set_totals(entries, scan.dirs_total, scan.bytes_total);
        if self.handle.config().dry_run {
            let mut preview = scan.into_dry_run();
            preview.files_total = entries;
            return Ok(Finished::Previewed(preview));
        }

        self.record_skipped(&scan);
        let handle = Arc::clone(&self.handle);
        let remover = Remover {
            id: handle.id(),
            counters: handle.progress(),
            cancel: handle.cancel_token(),
            drive_phase: true,
        };
        remover.remove(&scan.items, &mut self.failures)?;

        Ok(Finished::Transferred)
    }

    /// Run the scanner, feeding its progress into the operation's counters.
    pub(crate) fn scan(
        &self,
        sources: &[PathBuf],
        destination: Option<&Path>,
        scope: ConflictScope,
        extra_files: u64,
    ) -> Result<ScanResult, TransferError> {
        let config = self.handle.config();
        let options = ScanOptions {
            destination: destination.map(Path::to_path_buf),
            conflict_scope: scope,
            ..ScanOptions::default()
        }
        .max_conflicts(config.max_conflicts_to_show)
        // Each copied source lands under its own name, even one nested in
        // another; a delete or move already covers what is inside.
        .collapse_nested(self.handle.kind() != OperationKind::Copy);

        let feed = ScanFeed {
            handle: &self.handle,
            sink: self.sink.as_ref(),
            extra_files,
        };
        let result = Scanner::new(options).scan(sources, self.handle.cancel_token(), &feed)?;

        info!(
            operation_id = %self.handle.id(),
            files = result.files_total,
            dirs = result.dirs_total,
            bytes = result.bytes_total,
            "Scanned sources"
        );
        Ok(result)
    }

    /// Ask the mediator what to do with a collision.
    pub(crate) fn decide(
        &self,
        descriptor: ConflictDescriptor,
    ) -> Result<ConflictResolution, TransferError> {
        let handle = &self.handle;
        let decision = handle
            .mediator()
            .decide(descriptor, handle.cancel_token(), |pending| {
                info!(
                    operation_id = %handle.id(),
                    path = %pending.destination_path.display(),
                    "Waiting for conflict resolution"
                );
                self.sink.emit(TransferEvent::Conflict {
                    operation_id: handle.id(),
                    descriptor: pending.clone(),
                });
            });

        match decision {
            Decision::Apply(resolution) => Ok(resolution),
            Decision::Cancel(reason) => {
                handle.request_cancel(reason);
                Err(TransferError::Cancelled { reason })
            }
        }
    }

    pub(crate) fn checkpoint(&self) -> Result<(), TransferError> {
        if self.handle.is_cancelled() {
            return Err(TransferError::Cancelled {
                reason: self.handle.cancel_reason(),
            });
        }
        Ok(())
    }

    pub(crate) fn copier<'h>(&self, handle: &'h OperationHandle) -> FileCopier<'h> {
        let config = handle.config();
        FileCopier {
            id: handle.id(),
            counters: handle.progress(),
            cancel: handle.cancel_token(),
            chunked_threshold: config.chunked_copy_threshold,
            chunk_size: config.chunk_size,
            network: self.network,
        }
    }

    pub(crate) fn on_network(&self, sources: &[PathBuf], destination: &Path) -> bool {
        let paths = sources.iter().map(PathBuf::as_path).chain([destination]);
        touches_network(self.volumes.as_ref(), paths)
    }

    pub(crate) fn fail(&mut self, path: &Path, error: TransferError) {
        warn!(operation_id = %self.handle.id(), path = %path.display(), "{error}");
        self.failures.push(FileFailure::new(path, error));
    }

    fn fail_entry(&mut self, entry: &ScannedEntry, error: TransferError) {
        self.fail(&entry.path, error);
    }

    /// Entries the scan could not read are not transferred; say so.
    pub(crate) fn record_skipped(&mut self, scan: &ScanResult) {
        for warning in &scan.skipped {
            self.failures.push(FileFailure::new(
                &warning.path,
                TransferError::other(&warning.path, warning.message.clone()),
            ));
        }
    }
}

/// Count an entry as handled without transferring it.
fn pass_over(counters: &ProgressCounters, entry: &ScannedEntry) {
    if entry.kind != EntryKind::Dir {
        counters.file_done(entry.size);
    }
}

/// Count an entry as handled after it failed; its bytes never arrived.
fn give_up(counters: &ProgressCounters, entry: &ScannedEntry) {
    if entry.kind != EntryKind::Dir {
        counters.file_done(0);
    }
}

fn dir_of(entry: &ScannedEntry) -> Option<&Path> {
    (entry.kind == EntryKind::Dir).then_some(entry.relative.as_path())
}

/// Whether removing `target` would take `source` with it.
pub(crate) fn contains(target: &Path, source: &Path) -> bool {
    let source = source.canonicalize().unwrap_or_else(|_| source.to_path_buf());
    source.starts_with(target)
}

pub(crate) fn would_remove_source(target: &Path) -> TransferError {
    TransferError::other(target, "Overwriting would remove the source itself")
}

/// Forwards scanner progress into the operation's counters.
struct ScanFeed<'a> {
    handle: &'a OperationHandle,
    sink: &'a dyn EventSink,
    /// Files counted outside the scan, e.g. same-volume move items.
    extra_files: u64,
}

impl ScanObserver for ScanFeed<'_> {
    fn progress(&self, progress: &ScanProgress) {
        let counters = self.handle.progress();
        counters.set_totals(
            progress.files_found + self.extra_files,
            progress.dirs_found,
            progress.bytes_found,
        );
        counters.set_conflicts(progress.conflicts_found);
        counters.set_current(&progress.current_path);
    }

    fn conflict(&self, conflict: &ConflictDescriptor) {
        if self.handle.config().dry_run {
            self.sink.emit(TransferEvent::ScanConflict {
                operation_id: self.handle.id(),
                descriptor: conflict.clone(),
            });
        }
    }
}
