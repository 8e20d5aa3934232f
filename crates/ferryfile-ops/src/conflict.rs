//! Conflict mediation and collision-free naming.

use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferryfile_core::{CancelReason, ConflictDescriptor, ConflictPolicy, ConflictResolution};

use crate::operation::lock;

/// What the executor does with a collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Skip, overwrite or rename. Never `ConflictResolution::Cancel`.
    Apply(ConflictResolution),
    /// Stop the operation.
    Cancel(CancelReason),
}

#[derive(Debug, Default)]
struct MediatorState {
    pending: Option<ConflictDescriptor>,
    answer: Option<ConflictResolution>,
    remembered: Option<ConflictResolution>,
}

/// Hands conflicts to the caller in stop mode and waits for an answer.
///
/// Conflicts are surfaced one at a time. The wait is bounded by the
/// configured timeout; expiry cancels the operation.
#[derive(Debug)]
pub struct ConflictMediator {
    policy: ConflictPolicy,
    timeout: Duration,
    state: Mutex<MediatorState>,
    answered: Condvar,
}

impl ConflictMediator {
    pub fn new(policy: ConflictPolicy, timeout: Duration) -> Self {
        Self {
            policy,
            timeout,
            state: Mutex::new(MediatorState::default()),
            answered: Condvar::new(),
        }
    }

    /// Decide what to do with a collision, blocking in stop mode.
    ///
    /// `on_pause` runs once the conflict is published as pending, without any
    /// lock held.
    pub fn decide(
        &self,
        descriptor: ConflictDescriptor,
        cancel: &CancellationToken,
        on_pause: impl FnOnce(&ConflictDescriptor),
    ) -> Decision {
        if let Some(resolution) = self.policy.resolution() {
            return Decision::Apply(resolution);
        }

        {
            let mut state = lock(&self.state);
            if let Some(resolution) = state.remembered {
                return Decision::Apply(resolution);
            }
            state.pending = Some(descriptor.clone());
            state.answer = None;
        }

        on_pause(&descriptor);

        let guard = lock(&self.state);
        let (mut state, _) = self
            .answered
            .wait_timeout_while(guard, self.timeout, |s| {
                s.answer.is_none() && !cancel.is_cancelled()
            })
            .unwrap_or_else(PoisonError::into_inner);
        state.pending = None;

        match state.answer.take() {
            Some(ConflictResolution::Cancel) => Decision::Cancel(CancelReason::User),
            Some(resolution) => Decision::Apply(resolution),
            None if cancel.is_cancelled() => Decision::Cancel(CancelReason::User),
            None => {
                warn!(
                    path = %descriptor.destination_path.display(),
                    "Conflict unanswered after {:?}, cancelling",
                    self.timeout
                );
                Decision::Cancel(CancelReason::ConflictTimeout)
            }
        }
    }

    /// Answer the pending conflict.
    ///
    /// Returns `false` if nothing is pending. With `apply_to_all`, later
    /// conflicts of the same operation get the same answer without pausing.
    pub fn resolve(&self, resolution: ConflictResolution, apply_to_all: bool) -> bool {
        let mut state = lock(&self.state);
        if state.pending.is_none() || state.answer.is_some() {
            return false;
        }
        state.answer = Some(resolution);
        if apply_to_all && resolution != ConflictResolution::Cancel {
            state.remembered = Some(resolution);
        }
        debug!(%resolution, apply_to_all, "Conflict resolved");
        self.answered.notify_all();
        true
    }

    /// Conflict currently waiting for an answer.
    pub fn pending(&self) -> Option<ConflictDescriptor> {
        lock(&self.state).pending.clone()
    }

    /// Wake a waiter so it re-checks cancellation.
    pub fn wake(&self) {
        let _state = lock(&self.state);
        self.answered.notify_all();
    }
}

/// First free `name (n).ext` sibling of `path`.
///
/// For "file.txt", tries "file (1).txt", "file (2).txt", etc. Existence is
/// checked without following symlinks.
pub fn unique_name(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let candidate = |suffix: &str| {
        let name = match &extension {
            Some(ext) => format!("{stem} {suffix}.{ext}"),
            None => format!("{stem} {suffix}"),
        };
        parent.join(name)
    };

    for i in 1..10_000u32 {
        let new_path = candidate(&format!("({i})"));
        if std::fs::symlink_metadata(&new_path).is_err() {
            return new_path;
        }
    }

    // Fallback: use timestamp
    let timestamp = chrono::Utc::now().timestamp_millis();
    candidate(&format!("({timestamp})"))
}
