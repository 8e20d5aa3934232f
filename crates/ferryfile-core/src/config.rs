//! Per-operation transfer configuration.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ConflictResolution;

/// What to do when a destination entry already exists.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum ConflictPolicy {
    /// Pause and ask the caller.
    #[default]
    Stop,
    /// Leave the destination alone.
    Skip,
    /// Replace the destination.
    Overwrite,
    /// Write next to the destination under a `name (n).ext` name.
    Rename,
}

impl ConflictPolicy {
    /// Fixed resolution for automatic policies, `None` for `Stop`.
    pub fn resolution(self) -> Option<ConflictResolution> {
        match self {
            Self::Stop => None,
            Self::Skip => Some(ConflictResolution::Skip),
            Self::Overwrite => Some(ConflictResolution::Overwrite),
            Self::Rename => Some(ConflictResolution::Rename),
        }
    }
}

/// Configuration for a single copy, move or delete.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// Interval between progress snapshots, in milliseconds.
    #[builder(default = "200")]
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// How destination collisions are handled.
    #[builder(default)]
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Only scan and report, never touch the filesystem.
    #[builder(default = "false")]
    #[serde(default)]
    pub dry_run: bool,

    /// Cap on conflicts kept in a scan result.
    #[builder(default = "200")]
    #[serde(default = "default_max_conflicts_to_show")]
    pub max_conflicts_to_show: usize,

    /// How long a paused conflict waits for an answer, in milliseconds.
    #[builder(default = "300_000")]
    #[serde(default = "default_conflict_timeout_ms")]
    pub conflict_timeout_ms: u64,

    /// Files at or above this size are copied chunk by chunk.
    #[builder(default = "64 * 1024 * 1024")]
    #[serde(default = "default_chunked_copy_threshold")]
    pub chunked_copy_threshold: u64,

    /// Chunk size for chunked copies, in bytes.
    #[builder(default = "1024 * 1024")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Check free space on the destination volume before writing.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub check_free_space: bool,
}

fn default_progress_interval_ms() -> u64 {
    200
}

fn default_max_conflicts_to_show() -> usize {
    200
}

fn default_conflict_timeout_ms() -> u64 {
    300_000
}

fn default_chunked_copy_threshold() -> u64 {
    64 * 1024 * 1024
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

impl TransferConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.progress_interval_ms == Some(0) {
            return Err("Progress interval must be greater than zero".to_string());
        }
        if self.max_conflicts_to_show == Some(0) {
            return Err("Conflict sample cap must be greater than zero".to_string());
        }
        if self.conflict_timeout_ms == Some(0) {
            return Err("Conflict timeout must be greater than zero".to_string());
        }
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl TransferConfig {
    /// Create a new transfer config builder.
    pub fn builder() -> TransferConfigBuilder {
        TransferConfigBuilder::default()
    }

    /// Progress interval as a duration, never shorter than one millisecond.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    /// Conflict wait timeout as a duration.
    pub fn conflict_timeout(&self) -> Duration {
        Duration::from_millis(self.conflict_timeout_ms)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
            conflict_policy: ConflictPolicy::default(),
            dry_run: false,
            max_conflicts_to_show: default_max_conflicts_to_show(),
            conflict_timeout_ms: default_conflict_timeout_ms(),
            chunked_copy_threshold: default_chunked_copy_threshold(),
            chunk_size: default_chunk_size(),
            check_free_space: true,
        }
    }
}
