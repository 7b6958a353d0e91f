//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the trait boundaries the pipeline depends on; their
//! implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IObjectStore`] - Raw object-store primitives (GCS, in-memory)
//! - [`INotificationPublisher`] - Outbound update notifications

pub mod object_store;
pub mod publisher;

pub use object_store::IObjectStore;
pub use publisher::INotificationPublisher;
