//! Domain error types
//!
//! Validation failures raised while constructing domain values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The value cannot be used as a flat remote object name
    #[error("Invalid object name: {0}")]
    InvalidObjectName(String),

    /// The local path has no usable final segment
    #[error("Path has no file name: {0}")]
    NoFileName(String),

    /// The payload is not a well-formed update notification
    #[error("Invalid notification: {0}")]
    InvalidNotification(String),
}
