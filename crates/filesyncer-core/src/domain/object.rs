//! Remote object naming and metadata
//!
//! Object naming is flat: a local file is stored under its final path
//! segment only, so `/a/x.txt` and `/b/x.txt` share the remote object
//! `x.txt` and the most recent upload wins.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Content type attached to every uploaded object
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Metadata key recording who uploaded the object
pub const META_UPLOADED_BY: &str = "uploaded-by";

/// Metadata key recording when the object was uploaded
pub const META_UPLOAD_TIME: &str = "upload-time";

// ============================================================================
// ObjectName
// ============================================================================

/// A flat remote object key
///
/// Never empty, never `.` or `..`, and never contains a path separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectName(String);

impl ObjectName {
    /// Create a new ObjectName
    ///
    /// # Errors
    /// Returns error if the name is empty, a dot segment, or contains a separator
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.is_empty() || name == "." || name == ".." {
            return Err(DomainError::InvalidObjectName(name));
        }
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(DomainError::InvalidObjectName(name));
        }
        Ok(Self(name))
    }

    /// Derives the object name from the final segment of a local path
    ///
    /// # Errors
    /// Returns error if the path has no final segment (e.g. `/` or `..`)
    pub fn from_path(path: &Path) -> Result<Self, DomainError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| DomainError::NoFileName(path.display().to_string()))?;
        Self::new(file_name.to_string_lossy().into_owned())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ObjectName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ObjectName {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ObjectName> for String {
    fn from(name: ObjectName) -> Self {
        name.0
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ObjectMetadata / SyncObject
// ============================================================================

/// Provenance metadata attached to uploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Identity of the uploading node
    pub uploaded_by: String,
    /// When the upload started
    pub upload_time: DateTime<Utc>,
}

impl ObjectMetadata {
    /// Metadata for an upload happening now
    pub fn now(uploaded_by: impl Into<String>) -> Self {
        Self {
            uploaded_by: uploaded_by.into(),
            upload_time: Utc::now(),
        }
    }

    /// Renders the metadata as the string map stored with the object
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(META_UPLOADED_BY.to_string(), self.uploaded_by.clone());
        map.insert(
            META_UPLOAD_TIME.to_string(),
            self.upload_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        map
    }
}

/// The remote representation of a synced local file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncObject {
    /// Flat object name
    pub object_name: ObjectName,
    /// Always [`OCTET_STREAM`]
    pub content_type: String,
    /// Provenance metadata
    pub metadata: ObjectMetadata,
    /// Uploaded size in bytes
    pub size: u64,
}
