//! Notification consumer
//!
//! Follows the hub's event stream and downloads every object announced by a
//! creation notice into the work directory.
//!
//! ## Design Notes
//!
//! - Filtering is deliberately loose: any payload containing `"Create"`
//!   counts as a creation. The object name is the basename of the JSON
//!   `info` field, or the last `/`-separated segment of the raw text when
//!   the payload is not a notification object.
//! - Download failures are logged; the subscription keeps going.
//! - Transport errors and stream ends either reconnect with exponential
//!   backoff or, with reconnect disabled, end the consumer with an error.
//! - Cancellation is checked while waiting for the next event and while
//!   backing off, never in the middle of a download.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use eventsource_stream::Event as MessageEvent;
use futures_util::StreamExt;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use reqwest_eventsource::{Error as SseError, Event as SseEvent, EventSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use filesyncer_core::config::NotifyConfig;
use filesyncer_core::domain::{FileOperation, ObjectName, UpdateNotification};
use filesyncer_sync::storage::StorageSync;

use crate::{hub_endpoint, NotifyError};

/// First reconnect delay
pub const INITIAL_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

// ============================================================================
// Classification
// ============================================================================

/// What to do with one received payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerAction {
    /// Fetch this object into the work directory
    Download(ObjectName),
    /// Nothing to do
    Ignore,
}

/// Decides how to react to a message payload
pub fn classify(payload: &str) -> ConsumerAction {
    if !payload.contains(FileOperation::Create.as_str()) {
        return ConsumerAction::Ignore;
    }

    let candidate = match UpdateNotification::from_json(payload) {
        Ok(notification) => last_segment(&notification.info).to_string(),
        Err(_) => last_segment(payload)
            .trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '}')
            .to_string(),
    };

    match ObjectName::new(candidate) {
        Ok(name) => ConsumerAction::Download(name),
        Err(e) => {
            warn!(payload, error = %e, "Creation notice without a usable object name");
            ConsumerAction::Ignore
        }
    }
}

fn last_segment(text: &str) -> &str {
    text.trim().rsplit('/').next().unwrap_or_default()
}

// ============================================================================
// NotificationConsumer
// ============================================================================

/// How one subscription session ended without a transport error
enum SessionEnd {
    Cancelled,
}

/// Subscribes to the hub and mirrors announced objects locally
pub struct NotificationConsumer {
    client: Client,
    stream_url: Url,
    username: String,
    password: String,
    storage: Arc<StorageSync>,
    work_dir: PathBuf,
    reconnect: bool,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl NotificationConsumer {
    /// Creates a consumer from the notify section of the configuration
    ///
    /// # Arguments
    /// * `config` - Hub URL, credentials, stream name and reconnect policy
    /// * `storage` - Storage adapter used for downloads and the startup listing
    /// * `work_dir` - Directory downloads are written into
    pub fn from_config(
        config: &NotifyConfig,
        storage: Arc<StorageSync>,
        work_dir: impl Into<PathBuf>,
    ) -> Result<Self, NotifyError> {
        let mut stream_url = hub_endpoint(&config.hub_url, "stream")?;
        stream_url
            .query_pairs_mut()
            .append_pair("stream", &config.stream);

        Ok(Self {
            client: Client::new(),
            stream_url,
            username: config.username.clone(),
            password: config.password.clone(),
            storage,
            work_dir: work_dir.into(),
            reconnect: config.reconnect,
            initial_backoff: INITIAL_RECONNECT_BACKOFF,
            max_backoff: config.reconnect_max_backoff(),
        })
    }

    /// Overrides the first reconnect delay
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Logs the bucket contents, then consumes the stream until cancelled
    ///
    /// # Errors
    /// With reconnect disabled, returns the first transport error or
    /// stream end. With reconnect enabled, only returns on cancellation.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.log_bucket().await;

        let mut backoff = self.initial_backoff;
        loop {
            let error = match self.session(&shutdown, &mut backoff).await {
                Ok(SessionEnd::Cancelled) => {
                    debug!("Consumer cancelled");
                    return Ok(());
                }
                Err(e) => e,
            };

            if !self.reconnect {
                return Err(anyhow::Error::new(error).context("Notification subscription failed"));
            }

            warn!(
                error = %error,
                retry_in_ms = backoff.as_millis() as u64,
                "Subscription lost, reconnecting"
            );
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = backoff.saturating_mul(2).min(self.max_backoff);
        }
    }

    async fn log_bucket(&self) {
        match self.storage.list().await {
            Ok(names) => {
                let listing: Vec<&str> = names.iter().map(ObjectName::as_str).collect();
                info!(count = names.len(), objects = ?listing, "Bucket contents at startup");
            }
            Err(e) => warn!(error = %format!("{e:#}"), "Failed to list bucket at startup"),
        }
    }

    /// One connection: subscribe, then handle messages until the stream ends
    ///
    /// The event source's own retry is never used: the first error closes
    /// it and goes back to [`NotificationConsumer::run`].
    async fn session(
        &self,
        shutdown: &CancellationToken,
        backoff: &mut Duration,
    ) -> Result<SessionEnd, NotifyError> {
        let request = self
            .client
            .get(self.stream_url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header(CACHE_CONTROL, "no-cache");
        let mut events =
            EventSource::new(request).map_err(|e| NotifyError::Subscription(e.to_string()))?;

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(SessionEnd::Cancelled),
                event = events.next() => event,
            };

            match event {
                Some(Ok(SseEvent::Open)) => {
                    info!(url = %self.stream_url, "Subscribed to update stream");
                    *backoff = self.initial_backoff;
                }
                Some(Ok(SseEvent::Message(message))) => self.handle_message(&message).await,
                Some(Err(e)) => break Err(subscription_error(e).await),
                None => break Err(NotifyError::StreamClosed),
            }
        };

        events.close();
        end
    }

    /// Reacts to one message; failures are logged
    pub async fn handle_message(&self, message: &MessageEvent) {
        match classify(&message.data) {
            ConsumerAction::Download(name) => {
                info!(object = %name, "Received creation notice");
                if let Err(e) = self.storage.download(&name, &self.work_dir).await {
                    warn!(object = %name, error = %format!("{e:#}"), "Download failed");
                }
            }
            ConsumerAction::Ignore => {
                debug!(event = %message.event, data = %message.data, "Ignoring message");
            }
        }
    }
}

/// Maps an event source failure onto the consumer's error type
async fn subscription_error(error: SseError) -> NotifyError {
    match error {
        SseError::StreamEnded => NotifyError::StreamClosed,
        SseError::InvalidStatusCode(status, response) => NotifyError::Rejected {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        },
        other => NotifyError::Subscription(other.to_string()),
    }
}
