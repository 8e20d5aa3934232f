//! Public command surface of the transfer engine.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use ferryfile_core::{
    CancelReason, ConflictResolution, OperationId, OperationKind, OperationState, OperationStatus,
    OperationSummary, TransferConfig, TransferError, TransferEvent,
};

use crate::executor::{Executor, FileOperation, Outcome};
use crate::operation::OperationHandle;
use crate::progress::{ProgressEmitter, progress_event};
use crate::registry::OperationRegistry;
use crate::sink::EventSink;
use crate::strategy::{MetadataInspector, VolumeInspector};
use crate::validate::{check_sources, check_transfer};

/// How long a finished operation stays queryable if nobody acknowledges it.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);

struct EngineInner {
    registry: OperationRegistry,
    sink: Arc<dyn EventSink>,
    volumes: Arc<dyn VolumeInspector>,
    retention: Duration,
}

/// Runs copy, move and delete operations in the background.
///
/// Every command returns immediately. Each operation runs on its own tokio
/// task with the filesystem work on the blocking pool, and reports through
/// the engine's [`EventSink`]. The start commands must be called from
/// within a tokio runtime.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<EngineInner>,
}

impl TransferEngine {
    pub fn new(sink: impl EventSink) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry: OperationRegistry::new(),
                sink: Arc::new(sink),
                volumes: Arc::new(MetadataInspector),
                retention: DEFAULT_RETENTION,
            }),
        }
    }

    /// Engine whose events arrive on the returned channel.
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Replace what decides whether two paths share a volume.
    ///
    /// Only takes effect before the engine is cloned or used.
    pub fn with_inspector(mut self, volumes: impl VolumeInspector) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.volumes = Arc::new(volumes);
        }
        self
    }

    /// Change how long finished operations are kept.
    ///
    /// Only takes effect before the engine is cloned or used.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.retention = retention;
        }
        self
    }

    pub fn start_copy(
        &self,
        sources: Vec<PathBuf>,
        destination: PathBuf,
        config: TransferConfig,
    ) -> Result<OperationId, TransferError> {
        let destination = check_transfer(&sources, &destination)?;
        Ok(self.launch(
            FileOperation::Copy {
                sources,
                destination,
            },
            config,
        ))
    }

    pub fn start_move(
        &self,
        sources: Vec<PathBuf>,
        destination: PathBuf,
        config: TransferConfig,
    ) -> Result<OperationId, TransferError> {
        let destination = check_transfer(&sources, &destination)?;
        Ok(self.launch(
            FileOperation::Move {
                sources,
                destination,
            },
            config,
        ))
    }

    pub fn start_delete(
        &self,
        sources: Vec<PathBuf>,
        config: TransferConfig,
    ) -> Result<OperationId, TransferError> {
        check_sources(&sources)?;
        Ok(self.launch(FileOperation::Delete { sources }, config))
    }

    /// Request cancellation. `false` if the id is unknown or its work has
    /// already ended; `true` guarantees a `Cancelled` terminal event.
    pub fn cancel(&self, id: OperationId) -> bool {
        self.inner
            .registry
            .get(id)
            .is_some_and(|handle| handle.request_cancel(CancelReason::User))
    }

    /// Answer the conflict an operation is paused on. `false` if it is not
    /// paused.
    pub fn resolve_conflict(
        &self,
        id: OperationId,
        resolution: ConflictResolution,
        apply_to_all: bool,
    ) -> bool {
        self.inner
            .registry
            .get(id)
            .is_some_and(|handle| handle.mediator().resolve(resolution, apply_to_all))
    }

    pub fn list_active_operations(&self) -> Vec<OperationSummary> {
        self.inner
            .registry
            .active()
            .iter()
            .map(|handle| handle.summary())
            .collect()
    }

    pub fn status(&self, id: OperationId) -> Option<OperationStatus> {
        self.inner.registry.get(id).map(|handle| handle.status())
    }

    /// Forget a finished operation. `false` if it is unknown or still
    /// running.
    pub fn acknowledge(&self, id: OperationId) -> bool {
        self.inner.registry.remove_terminal(id).is_some()
    }

    fn launch(&self, operation: FileOperation, config: TransferConfig) -> OperationId {
        let kind = operation.kind();
        let handle = Arc::new(OperationHandle::new(OperationId::next(), kind, config));
        let id = handle.id();
        self.inner.registry.register(Arc::clone(&handle));

        info!(
            operation_id = %id,
            %kind,
            sources = operation.sources().len(),
            dry_run = handle.config().dry_run,
            "Starting {}",
            kind.verb()
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run(&inner, handle, operation).await;
            schedule_removal(Arc::downgrade(&inner), id, inner.retention);
        });
        id
    }
}

/// Drive one operation to its terminal event.
async fn run(inner: &EngineInner, handle: Arc<OperationHandle>, operation: FileOperation) {
    let emitter = ProgressEmitter::spawn(Arc::clone(&handle), Arc::clone(&inner.sink));

    let executor = Executor::new(
        Arc::clone(&handle),
        Arc::clone(&inner.sink),
        Arc::clone(&inner.volumes),
    );
    let outcome = tokio::task::spawn_blocking(move || executor.run(operation))
        .await
        .unwrap_or_else(|e| {
            error!(operation_id = %handle.id(), error = %e, "Operation task failed");
            Outcome::Failed(TransferError::other(
                PathBuf::new(),
                format!("Operation task failed: {e}"),
            ))
        });

    emitter.finish().await;

    let id = handle.id();
    let kind = handle.kind();
    let (state, terminal) = terminal_event(id, kind, outcome);
    handle.finish(state);

    inner.sink.emit(progress_event(&handle));
    info!(operation_id = %id, %kind, %state, "Operation finished");
    inner.sink.emit(terminal);
}

fn terminal_event(
    operation_id: OperationId,
    kind: OperationKind,
    outcome: Outcome,
) -> (OperationState, TransferEvent) {
    match outcome {
        Outcome::Completed {
            files_processed,
            bytes_processed,
            failures,
        } => (
            OperationState::Completed,
            TransferEvent::Complete {
                operation_id,
                kind,
                files_processed,
                bytes_processed,
                failures,
            },
        ),
        Outcome::Previewed(result) => (
            OperationState::Completed,
            TransferEvent::DryRunComplete {
                operation_id,
                kind,
                result,
            },
        ),
        Outcome::Failed(error) => (
            OperationState::Failed,
            TransferEvent::Error {
                operation_id,
                kind,
                error,
            },
        ),
        Outcome::Cancelled {
            files_processed,
            reason,
        } => (
            OperationState::Cancelled,
            TransferEvent::Cancelled {
                operation_id,
                kind,
                files_processed,
                reason,
            },
        ),
    }
}

/// Drop a finished operation from the registry once the retention period
/// passes, unless the engine is gone by then.
fn schedule_removal(inner: Weak<EngineInner>, id: OperationId, retention: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(retention).await;
        if let Some(inner) = inner.upgrade() {
            inner.registry.remove_terminal(id);
        }
    });
}
