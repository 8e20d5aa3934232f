//! Transfer engine for ferryfile.
//!
//! This crate runs copy, move and delete operations in the background. Each
//! operation scans its sources, transfers file by file while honoring
//! conflict decisions and cancellation, and reports progress, conflicts and
//! its outcome as [`TransferEvent`](ferryfile_core::TransferEvent)s through
//! an [`EventSink`].
//!
//! # Example
//!
//! ```no_run
//! use ferryfile_core::{TransferConfig, TransferEvent};
//! use ferryfile_ops::TransferEngine;
//!
//! # async fn example() -> Result<(), ferryfile_core::TransferError> {
//! let (engine, mut events) = TransferEngine::with_channel();
//! let id = engine.start_copy(
//!     vec!["/data/report.pdf".into()],
//!     "/backup".into(),
//!     TransferConfig::default(),
//! )?;
//!
//! while let Some(event) = events.recv().await {
//!     if event.operation_id() == id && event.is_terminal() {
//!         println!("{event:?}");
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod conflict;
mod copy;
mod delete;
mod engine;
mod executor;
mod move_op;
mod operation;
mod progress;
mod registry;
mod sink;
mod strategy;
mod validate;

pub use conflict::{ConflictMediator, Decision, unique_name};
pub use delete::removal_order;
pub use engine::{DEFAULT_RETENTION, TransferEngine};
pub use executor::FileOperation;
pub use operation::OperationHandle;
pub use progress::ProgressCounters;
pub use registry::OperationRegistry;
pub use sink::{EventSink, NullSink};
pub use strategy::{CopyMethod, MetadataInspector, MoveStrategy, VolumeInspector, plan_move};
pub use validate::{check_free_space, check_sources, check_transfer};
