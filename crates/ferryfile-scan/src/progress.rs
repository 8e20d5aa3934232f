//! Scan progress reporting.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::broadcast;

use ferryfile_core::ConflictDescriptor;

/// Progress information during a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanProgress {
    /// Files (and symlinks) found so far.
    pub files_found: u64,
    /// Directories found so far.
    pub dirs_found: u64,
    /// Bytes found so far.
    pub bytes_found: u64,
    /// Destination collisions found so far.
    pub conflicts_found: u64,
    /// Entries skipped so far.
    pub skipped: u64,
    /// Entry most recently visited.
    pub current_path: PathBuf,
    /// Time elapsed since scan started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Calculate scan rate in files per second.
    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.files_found as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Get total items found (files + dirs).
    pub fn total_items(&self) -> u64 {
        self.files_found + self.dirs_found
    }
}

/// Receives updates from a running scan.
///
/// Callbacks run on the scanning thread and must not block.
pub trait ScanObserver: Send + Sync {
    /// Called every few entries and once more when the walk finishes.
    fn progress(&self, _progress: &ScanProgress) {}

    /// Called for every conflict that makes it into the sample.
    fn conflict(&self, _conflict: &ConflictDescriptor) {}
}

impl ScanObserver for () {}

impl ScanObserver for broadcast::Sender<ScanProgress> {
    fn progress(&self, progress: &ScanProgress) {
        // No receivers is fine.
        let _ = self.send(progress.clone());
    }
}
