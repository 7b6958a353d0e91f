//! HTTP notification publisher
//!
//! Posts each [`UpdateNotification`] as JSON to `{hub_url}/sync` with basic
//! authentication and a per-request timeout.
//!
//! ## Design Notes
//!
//! - Failed attempts are retried `publish_retries` times with exponential
//!   backoff (1 s, 2 s, ...). After that the error goes back to the caller,
//!   which logs and drops it.
//! - Once the shutdown token is cancelled no further attempt starts; a
//!   pending backoff ends immediately with an error.
//! - Response bodies are logged but never interpreted; any 2xx is success.

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use filesyncer_core::config::NotifyConfig;
use filesyncer_core::domain::UpdateNotification;
use filesyncer_core::ports::INotificationPublisher;

use crate::{hub_endpoint, NotifyError};

/// Backoff before the first retry; doubles on each further retry
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// [`INotificationPublisher`] that posts to the broadcast hub
pub struct HttpNotificationPublisher {
    client: Client,
    endpoint: Url,
    username: String,
    password: String,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    shutdown: CancellationToken,
}

impl HttpNotificationPublisher {
    /// Creates a publisher from the notify section of the configuration
    ///
    /// # Errors
    /// Returns [`NotifyError::InvalidUrl`] if `hub_url` cannot be parsed
    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        Ok(Self {
            client: Client::new(),
            endpoint: hub_endpoint(&config.hub_url, "sync")?,
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: config.publish_timeout(),
            retries: config.publish_retries,
            backoff: DEFAULT_RETRY_BACKOFF,
            shutdown: CancellationToken::new(),
        })
    }

    /// Stops retrying once `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Overrides the initial retry backoff
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send_once(&self, notification: &UpdateNotification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(&self.username, Some(&self.password))
            .timeout(self.timeout)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), body = %body.trim(), "Hub accepted notification");
        Ok(())
    }
}

#[async_trait::async_trait]
impl INotificationPublisher for HttpNotificationPublisher {
    async fn publish(&self, notification: &UpdateNotification) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(notification).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries => {
                    let delay = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        attempt = attempt + 1,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => {
                            return Err(anyhow::Error::new(e).context(format!(
                                "Abandoned {} notification on shutdown",
                                notification.event
                            )));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!(
                        "Failed to publish {} notification after {} attempts",
                        notification.event,
                        attempt + 1
                    )))
                }
            }
        }
    }
}
