//! Shared state of a single running operation.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ferryfile_core::{
    CancelReason, OperationId, OperationKind, OperationState, OperationStatus, OperationSummary,
    TransferConfig,
};

use crate::conflict::ConflictMediator;
use crate::progress::ProgressCounters;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where an operation stands once its work has ended.
#[derive(Debug, Default)]
struct Lifecycle {
    /// The work has returned; cancelling can no longer change the outcome.
    sealed: bool,
    state: Option<OperationState>,
}

/// Everything callers and the owning task share about one operation.
///
/// Only the owning task mutates progress and phase; any caller may request
/// cancellation or answer a pending conflict.
#[derive(Debug)]
pub struct OperationHandle {
    id: OperationId,
    kind: OperationKind,
    config: TransferConfig,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    cancel_reason: OnceLock<CancelReason>,
    progress: ProgressCounters,
    mediator: ConflictMediator,
    lifecycle: Mutex<Lifecycle>,
}

impl OperationHandle {
    pub(crate) fn new(id: OperationId, kind: OperationKind, config: TransferConfig) -> Self {
        let mediator = ConflictMediator::new(config.conflict_policy, config.conflict_timeout());
        Self {
            id,
            kind,
            config,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            cancel_reason: OnceLock::new(),
            progress: ProgressCounters::default(),
            mediator,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub(crate) fn progress(&self) -> &ProgressCounters {
        &self.progress
    }

    pub(crate) fn mediator(&self) -> &ConflictMediator {
        &self.mediator
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Flag the operation for cancellation and wake a pending conflict wait.
    ///
    /// Returns `false` once the work has ended. An accepted request always
    /// ends the operation as cancelled. The first reason recorded wins.
    pub fn request_cancel(&self, reason: CancelReason) -> bool {
        {
            let lifecycle = lock(&self.lifecycle);
            if lifecycle.sealed {
                return false;
            }
            let _ = self.cancel_reason.set(reason);
            self.cancel.cancel();
        }
        self.mediator.wake();
        debug!(operation_id = %self.id, %reason, "Cancellation requested");
        true
    }

    /// Why the operation was cancelled, `User` if nobody said.
    pub fn cancel_reason(&self) -> CancelReason {
        self.cancel_reason.get().copied().unwrap_or(CancelReason::User)
    }

    pub fn is_terminal(&self) -> bool {
        lock(&self.lifecycle).state.is_some()
    }

    /// Stop accepting cancellation. Returns whether a cancel got in first.
    pub(crate) fn seal(&self) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.sealed = true;
        self.cancel.is_cancelled()
    }

    pub(crate) fn finish(&self, state: OperationState) {
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.sealed = true;
        lifecycle.state = Some(state);
    }

    pub fn state(&self) -> OperationState {
        if let Some(state) = lock(&self.lifecycle).state {
            return state;
        }
        if self.mediator.pending().is_some() {
            OperationState::AwaitingConflict
        } else {
            OperationState::Running
        }
    }

    pub fn summary(&self) -> OperationSummary {
        let snapshot = self.progress.snapshot();
        OperationSummary {
            operation_id: self.id,
            kind: self.kind,
            phase: snapshot.phase,
            percent_complete: snapshot.percent_complete(),
        }
    }

    pub fn status(&self) -> OperationStatus {
        OperationStatus {
            operation_id: self.id,
            kind: self.kind,
            state: self.state(),
            progress: self.progress.snapshot(),
            pending_conflict: self.mediator.pending(),
            cancel_requested: self.is_cancelled(),
            started_at: self.started_at,
        }
    }
}
