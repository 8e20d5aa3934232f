//! Registry of in-flight and recently finished operations.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use ferryfile_core::OperationId;

use crate::operation::OperationHandle;

/// Concurrent map from id to operation handle.
///
/// Accessors clone the `Arc` out of the map so no shard guard outlives the
/// call.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: DashMap<OperationId, Arc<OperationHandle>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<OperationHandle>) {
        debug!(operation_id = %handle.id(), "Registered operation");
        self.operations.insert(handle.id(), handle);
    }

    pub fn get(&self, id: OperationId) -> Option<Arc<OperationHandle>> {
        self.operations.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove an operation, but only once it has finished.
    pub fn remove_terminal(&self, id: OperationId) -> Option<Arc<OperationHandle>> {
        let removed = self
            .operations
            .remove_if(&id, |_, handle| handle.is_terminal())
            .map(|(_, handle)| handle);
        if removed.is_some() {
            debug!(operation_id = %id, "Removed operation");
        }
        removed
    }

    /// Handles of operations that have not finished yet, oldest first.
    pub fn active(&self) -> Vec<Arc<OperationHandle>> {
        let mut handles: Vec<_> = self
            .operations
            .iter()
            .filter(|entry| !entry.value().is_terminal())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        handles.sort_by_key(|handle| handle.id());
        handles
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
