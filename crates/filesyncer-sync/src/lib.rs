//! filesyncer Sync - local change detection and the upload pipeline
//!
//! Provides:
//! - A polling watcher that diffs recursive snapshots of the work directory
//! - An optional per-path debounce stage
//! - Timeout-bounded storage operations over any [`IObjectStore`]
//! - The change handler that maps events to uploads, deletes and notifications
//! - A one-shot startup reconciliation pass
//!
//! ## Modules
//!
//! - [`watcher`] - Snapshot scanning, diffing and the poll loop
//! - [`debounce`] - Quiet-window coalescing of change events
//! - [`storage`] - Storage adapter with per-operation deadlines
//! - [`handler`] - Event dispatch to storage and the publisher
//! - [`memory`] - In-process object store
//! - [`reconcile`] - Local tree vs. bucket reconciliation
//!
//! [`IObjectStore`]: filesyncer_core::ports::IObjectStore

pub mod debounce;
pub mod handler;
pub mod memory;
pub mod reconcile;
pub mod storage;
pub mod watcher;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the sync pipeline
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred while reading the watched tree or a file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The watch root does not exist or cannot be read
    #[error("Watch root not found: {0}")]
    WatchRootMissing(PathBuf),

    /// The watch root exists but is not a directory
    #[error("Watch root is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A storage operation exceeded its deadline
    #[error("{operation} of {target} timed out after {after:?}")]
    Timeout {
        /// Operation name, e.g. `"upload"`
        operation: &'static str,
        /// Object name or path the operation was working on
        target: String,
        /// The deadline that elapsed
        after: Duration,
    },

    /// A background scan task panicked or was cancelled
    #[error("Scan task failed: {0}")]
    ScanTask(String),
}
