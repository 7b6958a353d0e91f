//! Object store port (driven/secondary port)
//!
//! Raw primitives against a remote bucket keyed by flat object name.
//! Naming, timeouts and idempotency rules live one layer up in the storage
//! sync adapter so every backend behaves the same way.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are
//!   adapter-specific.
//! - Implementations do not retry; callers decide whether a failure is fatal.
//! - Content moves between the bucket and local files directly, so a backend
//!   can stream it instead of holding whole objects in memory.

use std::path::Path;

use crate::domain::object::{ObjectMetadata, ObjectName};

/// Port trait for object-store backends
#[async_trait::async_trait]
pub trait IObjectStore: Send + Sync {
    /// Returns whether an object with this name exists
    async fn object_exists(&self, name: &ObjectName) -> anyhow::Result<bool>;

    /// Stores the content of the file at `source` under `name`, overwriting
    /// any existing object
    ///
    /// The object is stored with content type `application/octet-stream`
    /// and the given provenance metadata. Returns the number of bytes sent.
    async fn put_object(
        &self,
        name: &ObjectName,
        source: &Path,
        metadata: &ObjectMetadata,
    ) -> anyhow::Result<u64>;

    /// Writes the object's content to `destination`, creating or truncating it
    ///
    /// A missing object is an error and leaves `destination` untouched.
    /// Returns the number of bytes written.
    async fn get_object(&self, name: &ObjectName, destination: &Path) -> anyhow::Result<u64>;

    /// Removes the object
    async fn delete_object(&self, name: &ObjectName) -> anyhow::Result<()>;

    /// Lists every object name in the bucket
    async fn list_objects(&self) -> anyhow::Result<Vec<ObjectName>>;
}
