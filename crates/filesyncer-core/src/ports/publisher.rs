//! Notification publisher port (driven/secondary port)
//!
//! Producer side of the publish/subscribe protocol. Delivery is
//! best-effort: there is no acknowledgement from subscribers and nothing is
//! retained for nodes that connect later.

use crate::domain::notification::UpdateNotification;

/// Port trait for pushing update notifications to the broadcast hub
#[async_trait::async_trait]
pub trait INotificationPublisher: Send + Sync {
    /// Publishes one notification
    ///
    /// Returns an error when the hub could not be reached or rejected the
    /// request. Callers log and drop it.
    async fn publish(&self, notification: &UpdateNotification) -> anyhow::Result<()>;
}
