//! Shared helpers for pipeline tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use filesyncer_core::domain::UpdateNotification;
use filesyncer_core::ports::INotificationPublisher;
use filesyncer_sync::handler::ChangeHandler;
use filesyncer_sync::memory::MemoryObjectStore;
use filesyncer_sync::storage::{StorageSync, StorageTimeouts};

pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Publisher that records every notification
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<UpdateNotification>>,
}

impl RecordingPublisher {
    pub fn sent(&self) -> Vec<UpdateNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl INotificationPublisher for RecordingPublisher {
    async fn publish(&self, notification: &UpdateNotification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn handler() -> (Arc<MemoryObjectStore>, Arc<RecordingPublisher>, ChangeHandler) {
    let store = Arc::new(MemoryObjectStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let storage = Arc::new(StorageSync::new(
        store.clone(),
        StorageTimeouts::default(),
        "pipeline-test",
    ));
    let handler = ChangeHandler::new(storage, publisher.clone());
    (store, publisher, handler)
}

/// Polls `check` until it returns true or five seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
