//! Startup reconciliation
//!
//! Brings the bucket in line with the local tree once, before the watch loop
//! starts: local files missing remotely are uploaded and, when asked for,
//! remote objects with no local file are deleted. No notifications are sent.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use filesyncer_core::domain::ObjectName;

use crate::storage::{DeleteOutcome, StorageSync};
use crate::watcher::WatchSet;

/// Reconciliation switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Delete bucket objects that have no local counterpart
    pub delete_remote_orphans: bool,
}

/// Summary of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub uploaded: Vec<ObjectName>,
    pub deleted: Vec<ObjectName>,
    /// Local files already present in the bucket
    pub in_sync: usize,
    /// Objects whose upload or delete failed
    pub failed: usize,
}

/// Reconciles the bucket against the files under `root`
///
/// Local files are matched by basename. When two local files share a
/// basename, the one later in path order is uploaded.
///
/// # Errors
/// Returns an error if the local tree cannot be scanned or the bucket
/// cannot be listed. Failures on individual objects are only counted.
pub async fn reconcile(
    storage: &StorageSync,
    root: &Path,
    options: ReconcileOptions,
) -> Result<ReconcileReport> {
    let snapshot = WatchSet::scan_async(root)
        .await
        .with_context(|| format!("Failed to scan {}", root.display()))?;

    let mut local: BTreeMap<ObjectName, PathBuf> = BTreeMap::new();
    for path in snapshot.files() {
        match ObjectName::from_path(path) {
            Ok(name) => {
                if let Some(previous) = local.insert(name, path.clone()) {
                    debug!(
                        shadowed = %previous.display(),
                        path = %path.display(),
                        "Basename collision during reconciliation"
                    );
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unnamed local file"),
        }
    }

    let remote: BTreeSet<ObjectName> = storage
        .list()
        .await
        .context("Failed to list bucket for reconciliation")?
        .into_iter()
        .collect();

    let mut report = ReconcileReport::default();

    for (name, path) in &local {
        if remote.contains(name) {
            report.in_sync += 1;
            continue;
        }
        match storage.upload(path).await {
            Ok(object) => report.uploaded.push(object.object_name),
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{e:#}"), "Reconciliation upload failed");
                report.failed += 1;
            }
        }
    }

    if options.delete_remote_orphans {
        for name in remote.iter().filter(|name| !local.contains_key(*name)) {
            match storage.delete_object(name).await {
                Ok(DeleteOutcome::Deleted) => report.deleted.push(name.clone()),
                Ok(DeleteOutcome::AlreadyAbsent) => {}
                Err(e) => {
                    warn!(object = %name, error = %format!("{e:#}"), "Reconciliation delete failed");
                    report.failed += 1;
                }
            }
        }
    }

    info!(
        uploaded = report.uploaded.len(),
        deleted = report.deleted.len(),
        in_sync = report.in_sync,
        failed = report.failed,
        "Reconciliation finished"
    );
    Ok(report)
}
