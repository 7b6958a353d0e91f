//! Domain types for the sync pipeline
//!
//! - Filesystem change events and their closed set of operations
//! - Flat remote object naming and object metadata
//! - Update notifications exchanged between nodes
//! - Domain-specific error types

pub mod errors;
pub mod event;
pub mod notification;
pub mod object;

pub use errors::DomainError;
pub use event::{FileChangeEvent, FileOperation};
pub use notification::UpdateNotification;
pub use object::{ObjectMetadata, ObjectName, SyncObject, OCTET_STREAM};
