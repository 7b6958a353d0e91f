//! Shared test helpers for storage integration tests

use std::sync::Arc;

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use filesyncer_storage::client::GcsClient;
use filesyncer_storage::credentials::{Credentials, TokenProvider};
use filesyncer_storage::provider::GcsObjectStore;

pub const BUCKET: &str = "sync-bucket";
pub const TOKEN: &str = "test-access-token";

/// PKCS#8 RSA key used to sign service account assertions in tests
pub const TEST_PRIVATE_KEY: &str = include_str!("../fixtures/test_key.pem");

/// Starts a mock server and returns a store pointing at it with a static token
pub async fn setup_store() -> (MockServer, GcsObjectStore) {
    let server = MockServer::start().await;
    let tokens = Arc::new(TokenProvider::new(Credentials::AccessToken {
        token: TOKEN.to_string(),
    }));
    let client = GcsClient::with_base_url(BUCKET, tokens, server.uri());
    (server, GcsObjectStore::new(client))
}

pub fn object_path(name: &str) -> String {
    format!("/storage/v1/b/{BUCKET}/o/{name}")
}

/// Mounts metadata for an existing object
pub async fn mount_object_metadata(server: &MockServer, name: &str) {
    Mock::given(method("GET"))
        .and(path(object_path(name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "storage#object",
            "name": name,
            "bucket": BUCKET,
            "size": "11",
            "contentType": "application/octet-stream"
        })))
        .mount(server)
        .await;
}

/// Mounts a 404 for the metadata of a missing object
pub async fn mount_missing_object(server: &MockServer, name: &str) {
    Mock::given(method("GET"))
        .and(path(object_path(name)))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": { "code": 404, "message": "No such object" }
        })))
        .mount(server)
        .await;
}

/// Mounts the media download of an object
pub async fn mount_download(server: &MockServer, name: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(object_path(name)))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(server)
        .await;
}
