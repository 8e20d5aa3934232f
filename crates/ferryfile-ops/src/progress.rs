//! Shared progress counters and the ticker that publishes them.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use ferryfile_core::{Phase, ProgressSnapshot, TransferEvent, display_name};

use crate::operation::{OperationHandle, lock};
use crate::sink::EventSink;

/// Counters written by the owning task and sampled by the emitter.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    phase: AtomicU8,
    files_done: AtomicU64,
    files_total: AtomicU64,
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    dirs_total: AtomicU64,
    conflicts_total: AtomicU64,
    current_file: Mutex<Option<String>>,
}

impl ProgressCounters {
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Advance the phase. Going backwards is ignored.
    pub fn advance(&self, phase: Phase) {
        self.phase.fetch_max(phase.as_u8(), Ordering::AcqRel);
    }

    pub fn set_totals(&self, files: u64, dirs: u64, bytes: u64) {
        self.files_total.store(files, Ordering::Relaxed);
        self.dirs_total.store(dirs, Ordering::Relaxed);
        self.bytes_total.store(bytes, Ordering::Relaxed);
    }

    pub fn set_conflicts(&self, conflicts: u64) {
        self.conflicts_total.store(conflicts, Ordering::Relaxed);
    }

    /// One file (or other counted entry) handled.
    pub fn file_done(&self, bytes: u64) {
        self.add_files(1, bytes);
    }

    /// Several entries handled at once, e.g. a skipped subtree.
    pub fn add_files(&self, files: u64, bytes: u64) {
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
        self.files_done.fetch_add(files, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Take back bytes of a file that did not make it.
    pub fn sub_bytes(&self, bytes: u64) {
        let _ = self
            .bytes_done
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |done| {
                Some(done.saturating_sub(bytes))
            });
    }

    pub fn set_current(&self, path: &Path) {
        *lock(&self.current_file) = display_name(path);
    }

    pub fn files_done(&self) -> u64 {
        self.files_done.load(Ordering::Relaxed)
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    pub fn dirs_total(&self) -> u64 {
        self.dirs_total.load(Ordering::Relaxed)
    }

    pub fn conflicts_total(&self) -> u64 {
        self.conflicts_total.load(Ordering::Relaxed)
    }

    /// Clamped point-in-time view.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::new(
            self.phase(),
            lock(&self.current_file).clone(),
            self.files_done.load(Ordering::Relaxed),
            self.files_total.load(Ordering::Relaxed),
            self.bytes_done.load(Ordering::Relaxed),
            self.bytes_total.load(Ordering::Relaxed),
        )
    }
}

/// Progress event for the current state of an operation.
///
/// Dry runs report scan progress, everything else transfer progress.
pub(crate) fn progress_event(handle: &OperationHandle) -> TransferEvent {
    let snapshot = handle.progress().snapshot();
    if handle.config().dry_run {
        TransferEvent::ScanProgress {
            operation_id: handle.id(),
            files_found: snapshot.files_total,
            dirs_found: handle.progress().dirs_total(),
            bytes_found: snapshot.bytes_total,
            conflicts_found: handle.progress().conflicts_total(),
            current_file: snapshot.current_file,
        }
    } else {
        TransferEvent::Progress {
            operation_id: handle.id(),
            kind: handle.kind(),
            snapshot,
        }
    }
}

/// Ticker publishing snapshots at the operation's progress interval.
pub(crate) struct ProgressEmitter {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ProgressEmitter {
    pub fn spawn(handle: Arc<OperationHandle>, sink: Arc<dyn EventSink>) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let period = handle.config().progress_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => sink.emit(progress_event(&handle)),
                }
            }
        });

        Self { stop, task }
    }

    /// Stop ticking. No snapshot is published after this returns.
    pub async fn finish(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}
