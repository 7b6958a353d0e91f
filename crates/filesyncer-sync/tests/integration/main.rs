//! Integration tests for filesyncer-sync
//!
//! Drives the full watch pipeline (poll watcher, optional debounce stage,
//! change handler) against a temporary directory and the in-memory store.

mod common;
