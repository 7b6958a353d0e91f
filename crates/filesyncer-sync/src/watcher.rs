//! Polling change detection
//!
//! Provides a [`PollWatcher`] that periodically takes a full recursive
//! snapshot of the work directory and diffs it against the previous one,
//! emitting one [`FileChangeEvent`] per difference.
//!
//! ## Architecture
//!
//! ```text
//!  WatchSet::scan (spawn_blocking)
//!       │
//!       ▼
//!  diff_snapshots  ──→  mpsc::unbounded_channel  ──→  [debounce]  ──→  ChangeHandler
//! ```
//!
//! ## Design Notes
//!
//! - Polling instead of OS notifications gives identical behaviour on every
//!   filesystem, including network mounts.
//! - Renames are recognised by pairing a removed and a created path that
//!   share an inode within one cycle.
//! - Cycles never overlap: the next sleep starts only after every event of
//!   the current cycle has been sent.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use filesyncer_core::domain::{FileChangeEvent, FileOperation};

use crate::SyncError;

// ============================================================================
// Snapshot types
// ============================================================================

/// The subset of file metadata the diff compares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub is_dir: bool,
    pub len: u64,
    pub modified: Option<SystemTime>,
    /// Permission bits
    pub mode: u32,
    /// Inode number, `0` where the platform has none
    pub inode: u64,
}

impl EntryStat {
    fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            is_dir: meta.is_dir(),
            len: meta.len(),
            modified: meta.modified().ok(),
            mode: permission_bits(meta),
            inode: inode(meta),
        }
    }
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    u32::from(meta.permissions().readonly())
}

#[cfg(unix)]
fn inode(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &std::fs::Metadata) -> u64 {
    0
}

/// A recursive snapshot of the watched tree, keyed and ordered by path
///
/// The root itself is not part of the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    entries: BTreeMap<PathBuf, EntryStat>,
}

impl WatchSet {
    /// Recursively enumerates `root` (blocking)
    ///
    /// Entries that vanish between listing and stat are skipped. Any other
    /// I/O failure is returned.
    ///
    /// # Errors
    /// Returns [`SyncError::WatchRootMissing`] if `root` does not exist,
    /// [`SyncError::NotADirectory`] if it is a file, or the underlying I/O
    /// error for unreadable directories.
    pub fn scan(root: &Path) -> Result<Self, SyncError> {
        let meta = std::fs::metadata(root).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SyncError::WatchRootMissing(root.to_path_buf()),
            _ => SyncError::IoError(e),
        })?;
        if !meta.is_dir() {
            return Err(SyncError::NotADirectory(root.to_path_buf()));
        }

        let mut entries = BTreeMap::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let listing = match std::fs::read_dir(&dir) {
                Ok(listing) => listing,
                // Subdirectory removed mid-scan
                Err(e) if e.kind() == ErrorKind::NotFound && dir != root => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(SyncError::WatchRootMissing(root.to_path_buf()))
                }
                Err(e) => return Err(e.into()),
            };

            for entry in listing {
                let entry = entry?;
                let path = entry.path();
                let meta = match std::fs::symlink_metadata(&path) {
                    Ok(meta) => meta,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        trace!(path = %path.display(), "Entry vanished during scan");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                let stat = EntryStat::from_metadata(&meta);
                if stat.is_dir {
                    pending.push(path.clone());
                }
                entries.insert(path, stat);
            }
        }

        Ok(Self { entries })
    }

    /// Runs [`WatchSet::scan`] on the blocking pool
    pub async fn scan_async(root: &Path) -> Result<Self, SyncError> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || Self::scan(&root))
            .await
            .map_err(|e| SyncError::ScanTask(e.to_string()))?
    }

    pub fn get(&self, path: &Path) -> Option<&EntryStat> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in path order
    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &EntryStat)> {
        self.entries.iter()
    }

    /// Iterates regular (non-directory) entries in path order
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries
            .iter()
            .filter(|(_, stat)| !stat.is_dir)
            .map(|(path, _)| path)
    }
}

impl FromIterator<(PathBuf, EntryStat)> for WatchSet {
    fn from_iter<I: IntoIterator<Item = (PathBuf, EntryStat)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Diff
// ============================================================================

/// Computes the events that turn `previous` into `current`
///
/// Ordering within the result:
/// 1. `Write` / `Chmod` for paths present in both snapshots, in path order
/// 2. `Rename` (same parent) / `Move` for removed and created paths sharing
///    an inode
/// 3. `Remove` for the remaining removed paths
/// 4. `Create` for the remaining created paths
///
/// A path whose type flips between file and directory is reported as a
/// removal plus a creation.
pub fn diff_snapshots(previous: &WatchSet, current: &WatchSet) -> Vec<FileChangeEvent> {
    let mut events = Vec::new();
    let mut removed: Vec<(&PathBuf, &EntryStat)> = Vec::new();
    let mut created: Vec<(&PathBuf, &EntryStat)> = Vec::new();

    for (path, new) in current.iter() {
        match previous.get(path) {
            Some(old) if old.is_dir != new.is_dir => {
                removed.push((path, old));
                created.push((path, new));
            }
            Some(old) => {
                if !new.is_dir && (old.len != new.len || old.modified != new.modified) {
                    events.push(FileChangeEvent::new(FileOperation::Write, path, false));
                }
                if old.mode != new.mode {
                    events.push(FileChangeEvent::new(FileOperation::Chmod, path, new.is_dir));
                }
            }
            None => created.push((path, new)),
        }
    }

    for (path, old) in previous.iter() {
        if current.get(path).is_none() {
            removed.push((path, old));
        }
    }
    removed.sort_by(|a, b| a.0.cmp(b.0));

    // Pair removals with creations of the same inode
    let mut paired_created: HashSet<usize> = HashSet::new();
    let mut unpaired_removed = Vec::new();
    for (old_path, old) in removed {
        let partner = (old.inode != 0)
            .then(|| {
                created.iter().enumerate().position(|(i, (_, new))| {
                    !paired_created.contains(&i) && new.inode == old.inode && new.is_dir == old.is_dir
                })
            })
            .flatten();

        match partner {
            Some(i) => {
                paired_created.insert(i);
                let new_path = created[i].0;
                let operation = if old_path.parent() == new_path.parent() {
                    FileOperation::Rename
                } else {
                    FileOperation::Move
                };
                events.push(FileChangeEvent::relocated(
                    operation, old_path, new_path, old.is_dir,
                ));
            }
            None => unpaired_removed.push((old_path, old)),
        }
    }

    for (path, old) in unpaired_removed {
        events.push(FileChangeEvent::new(FileOperation::Remove, path, old.is_dir));
    }

    for (i, (path, new)) in created.iter().enumerate() {
        if !paired_created.contains(&i) {
            events.push(FileChangeEvent::new(FileOperation::Create, *path, new.is_dir));
        }
    }

    events
}

// ============================================================================
// PollWatcher
// ============================================================================

/// Watches a directory tree by polling
pub struct PollWatcher {
    root: PathBuf,
    interval: Duration,
    snapshot: WatchSet,
}

impl PollWatcher {
    /// Takes the initial snapshot of `root`
    ///
    /// # Arguments
    /// * `root` - Directory to watch recursively
    /// * `interval` - Sleep between poll cycles
    ///
    /// # Errors
    /// Returns an error if `root` is missing, not a directory, or unreadable
    pub async fn new(root: impl Into<PathBuf>, interval: Duration) -> Result<Self, SyncError> {
        let root = root.into();
        let snapshot = WatchSet::scan_async(&root).await?;
        info!(
            root = %root.display(),
            entries = snapshot.len(),
            interval_ms = interval.as_millis() as u64,
            "Watching directory"
        );
        Ok(Self {
            root,
            interval,
            snapshot,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The snapshot the next cycle will diff against
    pub fn snapshot(&self) -> &WatchSet {
        &self.snapshot
    }

    /// Runs one cycle: rescans and returns the differences
    pub async fn poll_once(&mut self) -> Result<Vec<FileChangeEvent>, SyncError> {
        let current = WatchSet::scan_async(&self.root).await?;
        let events = diff_snapshots(&self.snapshot, &current);
        self.snapshot = current;
        Ok(events)
    }

    /// Polls until `shutdown` is cancelled, sending every event to `events`
    ///
    /// Returns `Ok(())` on cancellation or when the receiver is dropped;
    /// the sender is dropped on return so the channel closes.
    ///
    /// # Errors
    /// Returns the first scan failure; there is no retry.
    pub async fn run(
        mut self,
        events: mpsc::UnboundedSender<FileChangeEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), SyncError> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(root = %self.root.display(), "Watcher cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            let batch = self.poll_once().await?;
            if !batch.is_empty() {
                debug!(count = batch.len(), "Detected filesystem changes");
            }

            for event in batch {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                trace!(%event, "Emitting change event");
                if events.send(event).is_err() {
                    debug!("Event receiver dropped, stopping watcher");
                    return Ok(());
                }
            }
        }
    }
}
