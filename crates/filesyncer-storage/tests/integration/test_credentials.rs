//! Token exchange against a mocked OAuth endpoint

use std::sync::Arc;

use wiremock::matchers::{bearer_token, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use filesyncer_storage::client::GcsClient;
use filesyncer_storage::credentials::{Credentials, TokenProvider};
use filesyncer_storage::StorageError;

use crate::common::{self, BUCKET};

fn service_account_json(token_uri: &str) -> String {
    serde_json::json!({
        "type": "service_account",
        "project_id": "filesyncer-test",
        "client_email": "syncer@filesyncer-test.iam.gserviceaccount.com",
        "private_key": common::TEST_PRIVATE_KEY,
        "token_uri": token_uri
    })
    .to_string()
}

#[tokio::test]
async fn test_service_account_exchanges_signed_assertion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant-type%3Ajwt-bearer"))
        .and(body_string_contains("assertion=ey"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "sa-token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let creds =
        Credentials::from_json(&service_account_json(&format!("{}/token", server.uri()))).unwrap();
    let provider = TokenProvider::new(creds);

    assert_eq!(provider.access_token().await.unwrap().as_deref(), Some("sa-token"));
    // Second call is served from the cache
    assert_eq!(provider.access_token().await.unwrap().as_deref(), Some("sa-token"));
}

#[tokio::test]
async fn test_authorized_user_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "user-token",
            "expires_in": 3600
        })))
        .expect(2)
        .mount(&server)
        .await;

    let creds = Credentials::from_json(
        &serde_json::json!({
            "type": "authorized_user",
            "client_id": "cid",
            "client_secret": "csecret",
            "refresh_token": "rt-1",
            "token_uri": format!("{}/token", server.uri())
        })
        .to_string(),
    )
    .unwrap();
    let provider = TokenProvider::new(creds);

    assert_eq!(provider.access_token().await.unwrap().as_deref(), Some("user-token"));
    provider.invalidate().await;
    assert_eq!(provider.access_token().await.unwrap().as_deref(), Some("user-token"));
}

#[tokio::test]
async fn test_short_lived_token_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "short",
            "expires_in": 30
        })))
        .expect(2)
        .mount(&server)
        .await;

    let creds =
        Credentials::from_json(&service_account_json(&format!("{}/token", server.uri()))).unwrap();
    let provider = TokenProvider::new(creds);

    // Lifetime below the refresh margin: never served from cache
    provider.access_token().await.unwrap();
    provider.access_token().await.unwrap();
}

#[tokio::test]
async fn test_rejected_exchange_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
        .mount(&server)
        .await;

    let creds =
        Credentials::from_json(&service_account_json(&format!("{}/token", server.uri()))).unwrap();
    let err = TokenProvider::new(creds).access_token().await.unwrap_err();
    assert!(err.to_string().contains("invalid_grant"));
}

#[tokio::test]
async fn test_client_sends_exchanged_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "exchanged",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(common::object_path("a.txt")))
        .and(bearer_token("exchanged"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let creds =
        Credentials::from_json(&service_account_json(&format!("{}/token", server.uri()))).unwrap();
    let client = GcsClient::with_base_url(BUCKET, Arc::new(TokenProvider::new(creds)), server.uri());
    client.delete("a.txt").await.unwrap();
}

#[tokio::test]
async fn test_unauthorized_response_forces_new_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "revoked-or-fresh",
            "expires_in": 3600
        })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(common::object_path("a.txt")))
        .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(common::object_path("a.txt")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let creds =
        Credentials::from_json(&service_account_json(&format!("{}/token", server.uri()))).unwrap();
    let client = GcsClient::with_base_url(BUCKET, Arc::new(TokenProvider::new(creds)), server.uri());

    let err = client.delete("a.txt").await.unwrap_err();
    assert!(matches!(err, StorageError::Unauthorized(_)));
    // The cached token was dropped, so this call exchanges again
    client.delete("a.txt").await.unwrap();
}

#[tokio::test]
async fn test_credentials_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("key.json");
    std::fs::write(&file, service_account_json("https://oauth2.googleapis.com/token")).unwrap();

    let creds = Credentials::from_file(&file).unwrap();
    assert_eq!(creds.kind(), "service_account");
}
