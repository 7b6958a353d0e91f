//! Filesystem change events
//!
//! A [`FileChangeEvent`] is produced by the poll watcher for every delta it
//! detects inside the watched tree and is consumed exactly once by the change
//! handler. Events are never persisted.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// FileOperation
// ============================================================================

/// The closed set of filesystem operations the watcher can classify
///
/// Handlers match on this exhaustively, so adding a variant forces every
/// dispatcher to decide what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileOperation {
    /// A path appeared in the tree
    Create,
    /// A file's size or modification time changed
    Write,
    /// A path disappeared from the tree
    Remove,
    /// A path was renamed inside the same directory
    Rename,
    /// Permission bits changed
    Chmod,
    /// A path was moved to a different directory
    Move,
}

impl FileOperation {
    /// Returns the label used in logs and notifications
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FileOperation::Create => "Create",
            FileOperation::Write => "Write",
            FileOperation::Remove => "Remove",
            FileOperation::Rename => "Rename",
            FileOperation::Chmod => "Chmod",
            FileOperation::Move => "Move",
        }
    }
}

impl Display for FileOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// FileChangeEvent
// ============================================================================

/// A classified change to one path inside the watched tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    /// What happened to the path
    pub operation: FileOperation,
    /// The affected path (destination path for renames and moves)
    pub path: PathBuf,
    /// Source path for `Rename` and `Move`, `None` otherwise
    pub old_path: Option<PathBuf>,
    /// Whether the path refers to a directory
    pub is_dir: bool,
    /// When the watcher observed the change
    pub observed_at: DateTime<Utc>,
}

impl FileChangeEvent {
    /// Creates an event for a single path, stamped with the current time
    pub fn new(operation: FileOperation, path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            operation,
            path: path.into(),
            old_path: None,
            is_dir,
            observed_at: Utc::now(),
        }
    }

    /// Creates a `Rename` or `Move` event carrying both paths
    pub fn relocated(
        operation: FileOperation,
        old_path: impl Into<PathBuf>,
        new_path: impl Into<PathBuf>,
        is_dir: bool,
    ) -> Self {
        Self {
            operation,
            path: new_path.into(),
            old_path: Some(old_path.into()),
            is_dir,
            observed_at: Utc::now(),
        }
    }

    /// Shorthand for a file `Create` event
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(FileOperation::Create, path, false)
    }

    /// Shorthand for a file `Write` event
    pub fn written(path: impl Into<PathBuf>) -> Self {
        Self::new(FileOperation::Write, path, false)
    }

    /// Shorthand for a file `Remove` event
    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self::new(FileOperation::Remove, path, false)
    }

    /// Returns the primary path of the event
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Display for FileChangeEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.old_path {
            Some(old) => write!(
                f,
                "{} {} -> {}",
                self.operation,
                old.display(),
                self.path.display()
            ),
            None => write!(f, "{} {}", self.operation, self.path.display()),
        }
    }
}
