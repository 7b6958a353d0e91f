//! Change handler
//!
//! Maps each [`FileChangeEvent`] to storage work and, for creations, an
//! update notification:
//!
//! | operation | storage | notification |
//! |-----------|---------|--------------|
//! | `Create`  | upload  | `Create`     |
//! | `Write`   | upload  | none         |
//! | `Remove`  | delete  | none         |
//! | `Rename`, `Chmod`, `Move` | none | none |
//!
//! Directory events never reach storage: object naming is flat.
//!
//! ## Design Notes
//!
//! - One event at a time, in channel order. The storage step finishes before
//!   the notification step starts.
//! - Failures are logged and the event is dropped. Nothing here is fatal to
//!   the pipeline.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use filesyncer_core::domain::{FileChangeEvent, FileOperation, UpdateNotification};
use filesyncer_core::ports::INotificationPublisher;

use crate::storage::{DeleteOutcome, StorageSync};

/// What handling one event amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The file was uploaded; `notified` tells whether a notification went out
    Uploaded { notified: bool },
    /// The remote object was removed
    Deleted,
    /// A delete found nothing to remove
    AlreadyAbsent,
    /// The event requires no action
    Skipped,
    /// The storage step failed; the event was dropped
    Failed,
}

/// Dispatches change events to storage and the publisher
pub struct ChangeHandler {
    storage: Arc<StorageSync>,
    publisher: Arc<dyn INotificationPublisher>,
}

impl ChangeHandler {
    pub fn new(storage: Arc<StorageSync>, publisher: Arc<dyn INotificationPublisher>) -> Self {
        Self { storage, publisher }
    }

    /// Handles a single event
    pub async fn handle(&self, event: &FileChangeEvent) -> HandleOutcome {
        if event.is_dir {
            debug!(%event, "Ignoring directory event");
            return HandleOutcome::Skipped;
        }

        match event.operation {
            FileOperation::Create => match self.storage.upload(&event.path).await {
                Ok(_) => {
                    let notified = self.notify(event).await;
                    HandleOutcome::Uploaded { notified }
                }
                Err(e) => {
                    warn!(%event, error = %format!("{e:#}"), "Upload failed, dropping event");
                    HandleOutcome::Failed
                }
            },
            FileOperation::Write => match self.storage.upload(&event.path).await {
                Ok(_) => HandleOutcome::Uploaded { notified: false },
                Err(e) => {
                    warn!(%event, error = %format!("{e:#}"), "Upload failed, dropping event");
                    HandleOutcome::Failed
                }
            },
            FileOperation::Remove => match self.storage.delete(&event.path).await {
                Ok(DeleteOutcome::Deleted) => HandleOutcome::Deleted,
                Ok(DeleteOutcome::AlreadyAbsent) => HandleOutcome::AlreadyAbsent,
                Err(e) => {
                    warn!(%event, error = %format!("{e:#}"), "Delete failed, dropping event");
                    HandleOutcome::Failed
                }
            },
            FileOperation::Rename | FileOperation::Chmod | FileOperation::Move => {
                debug!(%event, "No action for event");
                HandleOutcome::Skipped
            }
        }
    }

    /// Publishes the creation notice; a failure is logged and dropped
    async fn notify(&self, event: &FileChangeEvent) -> bool {
        let notification =
            UpdateNotification::for_operation(event.operation, event.path.display().to_string());
        match self.publisher.publish(&notification).await {
            Ok(()) => {
                debug!(info = %notification.info, "Published update notification");
                true
            }
            Err(e) => {
                warn!(
                    info = %notification.info,
                    error = %format!("{e:#}"),
                    "Failed to publish update notification"
                );
                false
            }
        }
    }

    /// Handles events until the channel closes or `shutdown` is cancelled
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<FileChangeEvent>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("Change handler started");
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let outcome = self.handle(&event).await;
            debug!(%event, ?outcome, "Handled change event");
        }
        info!("Change handler stopped");
        Ok(())
    }
}
