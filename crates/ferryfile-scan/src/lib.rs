//! Source enumeration for ferryfile.
//!
//! The scanner walks the sources of a transfer with jwalk, counts files,
//! directories and bytes, and checks every entry against the destination it
//! would land on. It is the first phase of a real copy or cross-device move,
//! and the whole of a dry run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use ferryfile_scan::{ScanOptions, Scanner};
//! use tokio_util::sync::CancellationToken;
//!
//! let options = ScanOptions::for_destination("/backup");
//! let scanner = Scanner::new(options);
//! let result = scanner
//!     .scan(&[PathBuf::from("/home/user/photos")], &CancellationToken::new(), &())
//!     .unwrap();
//!
//! println!("{} files, {} bytes", result.files_total, result.bytes_total);
//! println!("{} conflicts", result.conflicts_total);
//! ```
//!
//! # Progress Monitoring
//!
//! Anything implementing [`ScanObserver`] receives periodic progress. A
//! `broadcast::Sender<ScanProgress>` is an observer, so async code can
//! subscribe to a running scan:
//!
//! ```rust,no_run
//! use tokio::sync::broadcast;
//! use ferryfile_scan::ScanProgress;
//!
//! let (tx, mut rx) = broadcast::channel::<ScanProgress>(100);
//! tokio::spawn(async move {
//!     while let Ok(progress) = rx.recv().await {
//!         println!("Found {} files", progress.files_found);
//!     }
//! });
//! ```

mod progress;
mod scanner;

pub use progress::{ScanObserver, ScanProgress};
pub use scanner::{
    ConflictScope, EntryKind, ScanOptions, ScanResult, ScannedEntry, ScannedItem, Scanner,
    distinct_sources,
};

// Re-export core types for convenience
pub use ferryfile_core::{ConflictDescriptor, ScanWarning, TransferError, WarningKind};
