//! Where operation events go.

use tokio::sync::{broadcast, mpsc};

use ferryfile_core::TransferEvent;

/// Receives every event of every operation an engine runs.
///
/// `emit` is called from async tasks and from blocking worker threads alike,
/// so implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: TransferEvent);
}

impl EventSink for mpsc::UnboundedSender<TransferEvent> {
    fn emit(&self, event: TransferEvent) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.send(event);
    }
}

impl EventSink for broadcast::Sender<TransferEvent> {
    fn emit(&self, event: TransferEvent) {
        let _ = self.send(event);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TransferEvent) {}
}
