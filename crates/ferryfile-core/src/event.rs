//! Events published by running operations and the status views built from
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    CancelReason, ConflictDescriptor, FileFailure, OperationId, OperationKind, Phase,
    ProgressSnapshot, ScanWarning, TransferError,
};

/// Totals reported by a dry run or a standalone scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResult {
    pub files_total: u64,
    pub dirs_total: u64,
    pub bytes_total: u64,
    /// Number of conflicts found, including those not in `conflicts`.
    pub conflicts_total: u64,
    /// Bounded sample of conflicts.
    pub conflicts: Vec<ConflictDescriptor>,
    /// `conflicts` was truncated.
    pub sampled: bool,
    /// Entries the scan could not read.
    pub skipped: Vec<ScanWarning>,
}

/// Everything an operation reports to its caller.
///
/// Exactly one of `Complete`, `Error`, `Cancelled` or `DryRunComplete` is
/// published per operation, and always last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TransferEvent {
    Progress {
        operation_id: OperationId,
        kind: OperationKind,
        #[serde(flatten)]
        snapshot: ProgressSnapshot,
    },
    Complete {
        operation_id: OperationId,
        kind: OperationKind,
        files_processed: u64,
        bytes_processed: u64,
        failures: Vec<FileFailure>,
    },
    Error {
        operation_id: OperationId,
        kind: OperationKind,
        error: TransferError,
    },
    Cancelled {
        operation_id: OperationId,
        kind: OperationKind,
        files_processed: u64,
        reason: CancelReason,
    },
    Conflict {
        operation_id: OperationId,
        descriptor: ConflictDescriptor,
    },
    ScanProgress {
        operation_id: OperationId,
        files_found: u64,
        dirs_found: u64,
        bytes_found: u64,
        conflicts_found: u64,
        current_file: Option<String>,
    },
    ScanConflict {
        operation_id: OperationId,
        descriptor: ConflictDescriptor,
    },
    DryRunComplete {
        operation_id: OperationId,
        kind: OperationKind,
        result: DryRunResult,
    },
}

impl TransferEvent {
    /// Operation this event belongs to.
    pub fn operation_id(&self) -> OperationId {
        match self {
            Self::Progress { operation_id, .. }
            | Self::Complete { operation_id, .. }
            | Self::Error { operation_id, .. }
            | Self::Cancelled { operation_id, .. }
            | Self::Conflict { operation_id, .. }
            | Self::ScanProgress { operation_id, .. }
            | Self::ScanConflict { operation_id, .. }
            | Self::DryRunComplete { operation_id, .. } => *operation_id,
        }
    }

    /// Whether this is the last event of its operation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. }
                | Self::Error { .. }
                | Self::Cancelled { .. }
                | Self::DryRunComplete { .. }
        )
    }
}

/// Lifecycle state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum OperationState {
    Running,
    /// Paused on a conflict in stop mode.
    AwaitingConflict,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Row returned by `list_active_operations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub phase: Phase,
    pub percent_complete: u8,
}

/// Detailed view of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub state: OperationState,
    pub progress: ProgressSnapshot,
    pub pending_conflict: Option<ConflictDescriptor>,
    pub cancel_requested: bool,
    pub started_at: DateTime<Utc>,
}
