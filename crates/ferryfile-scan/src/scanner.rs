//! JWalk-based source scanner.

use std::fs::{self, FileType, Metadata};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use jwalk::WalkDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferryfile_core::{
    CancelReason, ConflictDescriptor, DryRunResult, ScanWarning, TransferError, WarningKind,
    is_internal_name,
};

use crate::progress::{ScanObserver, ScanProgress};

/// Which entries are checked against the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictScope {
    /// Every entry, at any depth.
    #[default]
    Recursive,
    /// Only the top-level source items, which replace whole entries: a
    /// directory onto a directory collides too.
    TopLevel,
    /// No conflict detection.
    None,
}

/// Options for a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Directory the sources would be transferred into.
    pub destination: Option<PathBuf>,
    /// Which entries are checked for conflicts.
    pub conflict_scope: ConflictScope,
    /// Cap on conflicts kept in the result.
    pub max_conflicts: usize,
    /// Entries between observer progress callbacks.
    pub progress_every: u64,
    /// Drop sources inside another source. Repeated sources are always
    /// dropped.
    pub collapse_nested: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            destination: None,
            conflict_scope: ConflictScope::None,
            max_conflicts: 200,
            progress_every: 64,
            collapse_nested: false,
        }
    }
}

impl ScanOptions {
    /// Options for a transfer into `destination` with recursive conflict checks.
    pub fn for_destination(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(destination.into()),
            conflict_scope: ConflictScope::Recursive,
            ..Default::default()
        }
    }

    pub fn conflict_scope(mut self, scope: ConflictScope) -> Self {
        self.conflict_scope = scope;
        self
    }

    pub fn max_conflicts(mut self, max: usize) -> Self {
        self.max_conflicts = max.max(1);
        self
    }

    pub fn collapse_nested(mut self, collapse: bool) -> Self {
        self.collapse_nested = collapse;
        self
    }

    fn checks_conflicts_at(&self, depth: usize) -> bool {
        match self.conflict_scope {
            ConflictScope::Recursive => true,
            ConflictScope::TopLevel => depth == 0,
            ConflictScope::None => false,
        }
    }
}

/// Type of a scanned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

impl EntryKind {
    fn from_file_type(file_type: &FileType) -> Option<Self> {
        if file_type.is_symlink() {
            Some(Self::Symlink)
        } else if file_type.is_dir() {
            Some(Self::Dir)
        } else if file_type.is_file() {
            Some(Self::File)
        } else {
            None
        }
    }
}

/// One entry found under a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    /// Absolute path of the entry.
    pub path: PathBuf,
    /// Path below the source's parent, starting with the source's own name.
    pub relative: PathBuf,
    pub kind: EntryKind,
    /// Size in bytes, zero for directories.
    pub size: u64,
    /// Zero for the top-level item.
    pub depth: usize,
}

/// A top-level source and everything below it, in walk order.
///
/// `entries[0]` is the item itself; directories always precede their
/// contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedItem {
    pub source: PathBuf,
    pub kind: EntryKind,
    pub entries: Vec<ScannedEntry>,
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

impl ScannedItem {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Name the item lands under in the destination.
    pub fn name(&self) -> &Path {
        self.entries
            .first()
            .map(|e| e.relative.as_path())
            .unwrap_or_else(|| Path::new(""))
    }
}

/// Everything a scan found.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub items: Vec<ScannedItem>,
    pub files_total: u64,
    pub dirs_total: u64,
    pub bytes_total: u64,
    /// Bounded sample of conflicts.
    pub conflicts: Vec<ConflictDescriptor>,
    /// All conflicts found, sampled or not.
    pub conflicts_total: u64,
    /// `conflicts` was truncated.
    pub sampled: bool,
    pub skipped: Vec<ScanWarning>,
    pub duration: Duration,
}

impl ScanResult {
    /// Reduce to the totals reported by a dry run.
    pub fn into_dry_run(self) -> DryRunResult {
        DryRunResult {
            files_total: self.files_total,
            dirs_total: self.dirs_total,
            bytes_total: self.bytes_total,
            conflicts_total: self.conflicts_total,
            conflicts: self.conflicts,
            sampled: self.sampled,
            skipped: self.skipped,
        }
    }
}

/// Walks transfer sources and checks them against a destination.
pub struct Scanner {
    options: ScanOptions,
}

impl Scanner {
    /// Create a new scanner.
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan the given sources.
    ///
    /// Unreadable entries are recorded in `skipped` and the walk continues.
    /// Returns `TransferError::Cancelled` as soon as `cancel` fires.
    pub fn scan(
        &self,
        sources: &[PathBuf],
        cancel: &CancellationToken,
        observer: &dyn ScanObserver,
    ) -> Result<ScanResult, TransferError> {
        let mut state = ScanState::new(&self.options, observer);

        for source in &distinct_sources(sources, self.options.collapse_nested) {
            check_cancelled(cancel)?;
            if let Some(item) = self.scan_item(source, cancel, &mut state)? {
                state.result.items.push(item);
            }
        }

        Ok(state.finish())
    }

    /// Scan one top-level source.
    fn scan_item(
        &self,
        source: &Path,
        cancel: &CancellationToken,
        state: &mut ScanState<'_>,
    ) -> Result<Option<ScannedItem>, TransferError> {
        let metadata = match fs::symlink_metadata(source) {
            Ok(m) => m,
            Err(err) => {
                state.skip(ScanWarning::from_io(source, &err));
                return Ok(None);
            }
        };

        let Some(kind) = EntryKind::from_file_type(&metadata.file_type()) else {
            state.skip(ScanWarning::special_file(source));
            return Ok(None);
        };

        let Some(name) = source.file_name().map(PathBuf::from) else {
            state.skip(ScanWarning::new(
                source,
                "Source has no file name",
                WarningKind::ReadError,
            ));
            return Ok(None);
        };

        let mut item = ScannedItem {
            source: source.to_path_buf(),
            kind,
            entries: Vec::new(),
            files: 0,
            dirs: 0,
            bytes: 0,
        };
        state.record(&mut item, source.to_path_buf(), name.clone(), kind, 0, &metadata);

        if kind != EntryKind::Dir {
            return Ok(Some(item));
        }

        let walker = WalkDir::new(source)
            .sort(true)
            .follow_links(false)
            .skip_hidden(false)
            .min_depth(1)
            .process_read_dir(|_depth, _path, _state, children| {
                children.retain(|child| {
                    child
                        .as_ref()
                        .map(|entry| !is_internal_name(&entry.file_name))
                        .unwrap_or(true)
                });
            });

        for entry_result in walker {
            check_cancelled(cancel)?;

            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    let warning = match err.io_error() {
                        Some(io) => ScanWarning::from_io(path, io),
                        None => ScanWarning::new(path, err.to_string(), WarningKind::ReadError),
                    };
                    state.skip(warning);
                    continue;
                }
            };

            let path = entry.path();
            let Some(kind) = EntryKind::from_file_type(&entry.file_type()) else {
                state.skip(ScanWarning::special_file(&path));
                continue;
            };

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    let warning = match err.io_error() {
                        Some(io) => ScanWarning::from_io(&path, io),
                        None => {
                            ScanWarning::new(&path, err.to_string(), WarningKind::MetadataError)
                        }
                    };
                    state.skip(warning);
                    continue;
                }
            };

            let Ok(rest) = path.strip_prefix(source) else {
                continue;
            };
            let relative = name.join(rest);
            state.record(&mut item, path, relative, kind, entry.depth, &metadata);
        }

        Ok(Some(item))
    }
}

/// Accumulates a scan's results and paces observer callbacks.
struct ScanState<'a> {
    options: &'a ScanOptions,
    observer: &'a dyn ScanObserver,
    result: ScanResult,
    progress: ScanProgress,
    seen: u64,
    start: Instant,
}

impl<'a> ScanState<'a> {
    fn new(options: &'a ScanOptions, observer: &'a dyn ScanObserver) -> Self {
        Self {
            options,
            observer,
            result: ScanResult::default(),
            progress: ScanProgress::default(),
            seen: 0,
            start: Instant::now(),
        }
    }

    fn record(
        &mut self,
        item: &mut ScannedItem,
        path: PathBuf,
        relative: PathBuf,
        kind: EntryKind,
        depth: usize,
        metadata: &Metadata,
    ) {
        let size = match kind {
            EntryKind::Dir => 0,
            EntryKind::File | EntryKind::Symlink => metadata.len(),
        };

        match kind {
            EntryKind::Dir => {
                item.dirs += 1;
                self.result.dirs_total += 1;
            }
            EntryKind::File | EntryKind::Symlink => {
                item.files += 1;
                item.bytes += size;
                self.result.files_total += 1;
                self.result.bytes_total += size;
            }
        }

        if self.options.checks_conflicts_at(depth)
            && let Some(destination) = &self.options.destination
        {
            let target = destination.join(&relative);
            self.check_conflict(&path, &target, kind, metadata);
        }

        self.progress.current_path.clone_from(&path);
        item.entries.push(ScannedEntry {
            path,
            relative,
            kind,
            size,
            depth,
        });

        self.seen += 1;
        if self.seen % self.options.progress_every.max(1) == 0 {
            self.report();
        }
    }

    fn check_conflict(&mut self, source: &Path, target: &Path, kind: EntryKind, metadata: &Metadata) {
        let Ok(existing) = fs::symlink_metadata(target) else {
            return;
        };
        let merges = self.options.conflict_scope == ConflictScope::Recursive
            && kind == EntryKind::Dir
            && existing.is_dir();
        if merges {
            return;
        }

        self.result.conflicts_total += 1;
        if self.result.conflicts.len() < self.options.max_conflicts {
            let conflict = ConflictDescriptor::from_metadata(source, target, metadata, &existing);
            self.observer.conflict(&conflict);
            self.result.conflicts.push(conflict);
        } else {
            self.result.sampled = true;
        }
    }

    fn skip(&mut self, warning: ScanWarning) {
        warn!(path = %warning.path.display(), "Skipping entry: {}", warning.message);
        self.result.skipped.push(warning);
    }

    fn report(&mut self) {
        self.progress.files_found = self.result.files_total;
        self.progress.dirs_found = self.result.dirs_total;
        self.progress.bytes_found = self.result.bytes_total;
        self.progress.conflicts_found = self.result.conflicts_total;
        self.progress.skipped = self.result.skipped.len() as u64;
        self.progress.elapsed = self.start.elapsed();
        self.observer.progress(&self.progress);
    }

    fn finish(mut self) -> ScanResult {
        self.report();
        self.result.duration = self.start.elapsed();
        debug!(
            files = self.result.files_total,
            dirs = self.result.dirs_total,
            bytes = self.result.bytes_total,
            conflicts = self.result.conflicts_total,
            skipped = self.result.skipped.len(),
            "Scan finished in {:?}",
            self.result.duration
        );
        self.result
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), TransferError> {
    if cancel.is_cancelled() {
        Err(TransferError::Cancelled {
            reason: CancelReason::User,
        })
    } else {
        Ok(())
    }
}

/// `sources` without repeats and, with `collapse_nested`, without sources
/// that lie inside another one. Order is kept.
///
/// Paths are compared with their parent directory resolved, so a symlink
/// source stays distinct from what it points to.
pub fn distinct_sources(sources: &[PathBuf], collapse_nested: bool) -> Vec<PathBuf> {
    let resolved: Vec<PathBuf> = sources.iter().map(|s| resolve_parent(s)).collect();

    let mut kept = Vec::with_capacity(sources.len());
    for (i, path) in resolved.iter().enumerate() {
        let repeated = resolved[..i].contains(path);
        let nested = collapse_nested
            && resolved
                .iter()
                .any(|other| other != path && path.starts_with(other));
        if repeated || nested {
            debug!(source = %sources[i].display(), "Source already covered, not scanned again");
            continue;
        }
        kept.push(sources[i].clone());
    }
    kept
}

fn resolve_parent(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    parent
        .canonicalize()
        .map(|p| p.join(name))
        .unwrap_or_else(|_| path.to_path_buf())
}
