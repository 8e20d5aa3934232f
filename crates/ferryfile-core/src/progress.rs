//! Progress snapshots.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Phase;

/// Point-in-time view of an operation's counters.
///
/// Snapshots are always clamped so `files_done <= files_total` and
/// `bytes_done <= bytes_total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub phase: Phase,
    /// File name only, never a full path.
    pub current_file: Option<String>,
    pub files_done: u64,
    pub files_total: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl ProgressSnapshot {
    /// Build a snapshot, clamping done counters to their totals.
    pub fn new(
        phase: Phase,
        current_file: Option<String>,
        files_done: u64,
        files_total: u64,
        bytes_done: u64,
        bytes_total: u64,
    ) -> Self {
        Self {
            phase,
            current_file,
            files_done: files_done.min(files_total),
            files_total,
            bytes_done: bytes_done.min(bytes_total),
            bytes_total,
        }
    }

    /// Completion from 0.0 to 1.0, by bytes when known, otherwise by files.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total > 0 {
            self.bytes_done as f64 / self.bytes_total as f64
        } else if self.files_total > 0 {
            self.files_done as f64 / self.files_total as f64
        } else {
            0.0
        }
    }

    /// Completion as a whole percentage.
    pub fn percent_complete(&self) -> u8 {
        (self.fraction() * 100.0).clamp(0.0, 100.0) as u8
    }
}

/// Last path component as a display string.
pub fn display_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
