//! Conflict descriptors and resolutions.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How a single conflict is resolved.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum ConflictResolution {
    /// Leave the destination untouched and move on.
    Skip,
    /// Replace the destination.
    Overwrite,
    /// Write under a fresh `name (n).ext` name.
    Rename,
    /// Stop the whole operation.
    Cancel,
}

/// Both sides of a destination collision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDescriptor {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub source_size: u64,
    pub destination_size: u64,
    pub source_modified: Option<DateTime<Utc>>,
    pub destination_modified: Option<DateTime<Utc>>,
    /// Destination was modified after the source.
    pub destination_is_newer: bool,
    /// Destination size minus source size.
    pub size_difference: i64,
    /// Source is a directory.
    pub is_directory: bool,
}

impl ConflictDescriptor {
    /// Build a descriptor from already-read metadata of both sides.
    pub fn from_metadata(
        source_path: impl Into<PathBuf>,
        destination_path: impl Into<PathBuf>,
        source: &Metadata,
        destination: &Metadata,
    ) -> Self {
        let source_modified = source.modified().ok().map(DateTime::<Utc>::from);
        let destination_modified = destination.modified().ok().map(DateTime::<Utc>::from);
        let destination_is_newer = match (source_modified, destination_modified) {
            (Some(s), Some(d)) => d > s,
            _ => false,
        };

        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            source_size: source.len(),
            destination_size: destination.len(),
            source_modified,
            destination_modified,
            destination_is_newer,
            size_difference: destination.len() as i64 - source.len() as i64,
            is_directory: source.is_dir(),
        }
    }

    /// Stat both sides without following symlinks.
    ///
    /// Returns `None` if the destination does not exist or either side can't
    /// be read.
    pub fn detect(source: &Path, destination: &Path) -> Option<Self> {
        let dest_meta = std::fs::symlink_metadata(destination).ok()?;
        let src_meta = std::fs::symlink_metadata(source).ok()?;
        Some(Self::from_metadata(source, destination, &src_meta, &dest_meta))
    }
}
