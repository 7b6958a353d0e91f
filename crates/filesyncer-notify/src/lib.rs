//! filesyncer Notify - publish/subscribe change notifications
//!
//! Provides:
//! - An HTTP publisher that posts update notifications to the broadcast hub
//! - A consumer that follows the hub's event stream and downloads announced
//!   objects
//! - The broadcast hub itself, an HTTP server fanning published messages out
//!   to every connected subscriber
//!
//! ## Modules
//!
//! - [`publisher`] - `INotificationPublisher` over HTTP with bounded retry
//! - [`sse`] - Server-Sent Events frame encoding
//! - [`consumer`] - Subscription loop (reqwest-eventsource), message
//!   classification, reconnects
//! - [`hub`] - Embedded broadcast hub (hyper)

pub mod consumer;
pub mod hub;
pub mod publisher;
pub mod sse;

use thiserror::Error;

/// Errors that can occur when talking to the broadcast hub
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The hub answered with a non-success status
    #[error("Hub rejected request with {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The hub ended the subscription stream
    #[error("Subscription stream closed by hub")]
    StreamClosed,

    /// The event stream failed to open or could not be parsed
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// The configured hub URL cannot be used
    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),
}

/// Joins `path` onto the hub base URL, keeping any base path
pub(crate) fn hub_endpoint(hub_url: &str, path: &str) -> Result<url::Url, NotifyError> {
    let mut url =
        url::Url::parse(hub_url).map_err(|e| NotifyError::InvalidUrl(format!("{hub_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| NotifyError::InvalidUrl(hub_url.to_string()))?
        .pop_if_empty()
        .push(path);
    Ok(url)
}
