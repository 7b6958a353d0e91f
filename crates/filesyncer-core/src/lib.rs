//! Filesyncer Core - Domain types, ports and configuration
//!
//! This crate contains the shared vocabulary of the sync pipeline:
//! - **Domain types** - `FileChangeEvent`, `FileOperation`, `ObjectName`,
//!   `SyncObject`, `UpdateNotification`
//! - **Port definitions** - Traits implemented by adapter crates:
//!   `IObjectStore`, `INotificationPublisher`
//! - **Configuration** - The YAML-backed `Config` passed explicitly into
//!   every component at construction time
//!
//! # Architecture
//!
//! The domain module has no I/O. Ports define the trait boundaries that the
//! storage and notification adapters implement, so the change handler and
//! consumer can be exercised against in-process fakes.

pub mod config;
pub mod domain;
pub mod ports;
