//! Integration tests for filesyncer-notify
//!
//! The publisher and consumer are exercised against wiremock servers; the
//! hub is bound on an ephemeral port and driven over real HTTP.

mod common;

mod test_consumer;
mod test_hub;
mod test_publisher;
