//! filesyncer Storage - Google Cloud Storage client
//!
//! Provides an async client for the GCS JSON API:
//! - Credential loading and access-token exchange
//! - Object existence, multipart upload, media download, delete and list
//! - An [`IObjectStore`](filesyncer_core::ports::IObjectStore) adapter
//!
//! ## Modules
//!
//! - [`credentials`] - Credentials file parsing and the caching token provider
//! - [`client`] - GCS JSON API HTTP client
//! - [`provider`] - `IObjectStore` implementation on top of the client

pub mod client;
pub mod credentials;
pub mod provider;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when talking to the storage API
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object or bucket does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials are missing, invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The credentials lack permission for the request
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The API response could not be parsed or had an unexpected status
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The configured endpoint cannot be turned into a request URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The credentials file could not be read or used
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// A local file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Maps a non-success HTTP status and its body to an error
    pub fn from_status(status: StatusCode, body: String) -> Self {
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {body}")
        };
        match status {
            StatusCode::NOT_FOUND => StorageError::NotFound(detail),
            StatusCode::UNAUTHORIZED => StorageError::Unauthorized(detail),
            StatusCode::FORBIDDEN => StorageError::Forbidden(detail),
            s if s.is_server_error() => StorageError::ServerError(detail),
            _ => StorageError::InvalidResponse(detail),
        }
    }

    /// Whether this error means the object is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}
