//! Update notifications exchanged between nodes
//!
//! Wire form is the JSON object `{"event": "...", "info": "..."}`. A
//! notification lives for one publish request or one streamed frame.

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::event::FileOperation;

/// A change notice broadcast to other nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotification {
    /// Kind label, e.g. `"Create"`
    pub event: String,
    /// Path or identifying string of the changed object
    pub info: String,
}

impl UpdateNotification {
    /// Creates a notification with an arbitrary kind label
    pub fn new(event: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            info: info.into(),
        }
    }

    /// Creates a notification for a filesystem operation on `info`
    pub fn for_operation(operation: FileOperation, info: impl Into<String>) -> Self {
        Self::new(operation.as_str(), info)
    }

    /// Serializes to the JSON wire form
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, DomainError> {
        serde_json::to_string(self).map_err(|e| DomainError::InvalidNotification(e.to_string()))
    }

    /// Parses the JSON wire form
    ///
    /// # Errors
    /// Returns error if the text is not a JSON object with `event` and `info`
    pub fn from_json(text: &str) -> Result<Self, DomainError> {
        serde_json::from_str(text.trim()).map_err(|e| DomainError::InvalidNotification(e.to_string()))
    }
}
