//! Storage adapter with per-operation deadlines
//!
//! [`StorageSync`] turns local paths into flat object names and runs every
//! [`IObjectStore`] call under its own `tokio::time::timeout`. It never
//! retries; callers decide what a failure means.
//!
//! ## Design Notes
//!
//! - Uploads are last-writer-wins: no existence check, no version check.
//! - Deletes are idempotent: an existence check runs first and a missing
//!   object is reported as [`DeleteOutcome::AlreadyAbsent`] without calling
//!   the remove primitive.
//! - Downloads overwrite the destination file in place.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use filesyncer_core::config::StorageTimeoutsConfig;
use filesyncer_core::domain::{ObjectMetadata, ObjectName, SyncObject, OCTET_STREAM};
use filesyncer_core::ports::IObjectStore;

use crate::SyncError;

/// Deadlines for each storage operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageTimeouts {
    pub exists: Duration,
    pub upload: Duration,
    pub delete: Duration,
    pub list: Duration,
    pub download: Duration,
}

impl Default for StorageTimeouts {
    fn default() -> Self {
        Self::from(&StorageTimeoutsConfig::default())
    }
}

impl From<&StorageTimeoutsConfig> for StorageTimeouts {
    fn from(config: &StorageTimeoutsConfig) -> Self {
        Self {
            exists: config.exists(),
            upload: config.upload(),
            delete: config.delete(),
            list: config.list(),
            download: config.download(),
        }
    }
}

/// Result of an idempotent delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The object existed and was removed
    Deleted,
    /// The object was not in the bucket; nothing was removed
    AlreadyAbsent,
}

/// Timeout-bounded storage operations keyed by local path
pub struct StorageSync {
    store: Arc<dyn IObjectStore>,
    timeouts: StorageTimeouts,
    uploaded_by: String,
}

impl StorageSync {
    /// # Arguments
    /// * `store` - Backend implementing the object-store primitives
    /// * `timeouts` - Per-operation deadlines
    /// * `uploaded_by` - Value of the `uploaded-by` metadata key
    pub fn new(
        store: Arc<dyn IObjectStore>,
        timeouts: StorageTimeouts,
        uploaded_by: impl Into<String>,
    ) -> Self {
        Self {
            store,
            timeouts,
            uploaded_by: uploaded_by.into(),
        }
    }

    pub fn timeouts(&self) -> &StorageTimeouts {
        &self.timeouts
    }

    pub fn store(&self) -> &Arc<dyn IObjectStore> {
        &self.store
    }

    /// Uploads the file at `local_path` under its basename
    ///
    /// # Errors
    /// Returns an error if the path has no file name, the file cannot be
    /// read, the backend fails, or the upload deadline elapses
    #[instrument(skip(self), fields(path = %local_path.display()))]
    pub async fn upload(&self, local_path: &Path) -> Result<SyncObject> {
        let name = ObjectName::from_path(local_path)?;
        let metadata = ObjectMetadata::now(&self.uploaded_by);

        let size = bounded(
            "upload",
            name.as_str(),
            self.timeouts.upload,
            self.store.put_object(&name, local_path, &metadata),
        )
        .await?;

        info!(object = %name, size, "Uploaded file");
        Ok(SyncObject {
            object_name: name,
            content_type: OCTET_STREAM.to_string(),
            metadata,
            size,
        })
    }

    /// Removes the object named after `local_path`'s basename, if present
    #[instrument(skip(self), fields(path = %local_path.display()))]
    pub async fn delete(&self, local_path: &Path) -> Result<DeleteOutcome> {
        let name = ObjectName::from_path(local_path)?;
        self.delete_object(&name).await
    }

    /// Removes `name` from the bucket, if present
    pub async fn delete_object(&self, name: &ObjectName) -> Result<DeleteOutcome> {
        let exists = self.exists(name).await?;
        if !exists {
            info!(object = %name, "Object already absent, nothing to delete");
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        bounded(
            "delete",
            name.as_str(),
            self.timeouts.delete,
            self.store.delete_object(name),
        )
        .await?;

        info!(object = %name, "Deleted object");
        Ok(DeleteOutcome::Deleted)
    }

    /// Fetches `name` into `destination_dir/name`, overwriting any existing file
    ///
    /// # Returns
    /// The path of the written file
    #[instrument(skip(self), fields(object = %name, dir = %destination_dir.display()))]
    pub async fn download(&self, name: &ObjectName, destination_dir: &Path) -> Result<PathBuf> {
        let target = destination_dir.join(name.as_str());

        tokio::fs::create_dir_all(destination_dir)
            .await
            .with_context(|| format!("Failed to create {}", destination_dir.display()))?;
        let size = bounded(
            "download",
            name.as_str(),
            self.timeouts.download,
            self.store.get_object(name, &target),
        )
        .await?;

        info!(object = %name, path = %target.display(), size, "Downloaded object");
        Ok(target)
    }

    /// Lists every object name in the bucket
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<ObjectName>> {
        let names = bounded("list", "bucket", self.timeouts.list, self.store.list_objects()).await?;
        debug!(count = names.len(), "Listed bucket");
        Ok(names)
    }

    /// Checks whether `name` exists in the bucket
    pub async fn exists(&self, name: &ObjectName) -> Result<bool> {
        bounded(
            "exists",
            name.as_str(),
            self.timeouts.exists,
            self.store.object_exists(name),
        )
        .await
    }
}

/// Runs `fut` under `budget`, labelling failures with the operation and target
async fn bounded<T, F>(operation: &'static str, target: &str, budget: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result.with_context(|| format!("{operation} of {target} failed")),
        Err(_) => Err(SyncError::Timeout {
            operation,
            target: target.to_string(),
            after: budget,
        }
        .into()),
    }
}
