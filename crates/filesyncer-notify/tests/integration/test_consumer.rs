//! Consumer against a mocked event stream

use std::time::Duration;

use filesyncer_notify::consumer::NotificationConsumer;
use filesyncer_notify::sse::SseMessage;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{basic_auth, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{eventually, notify_config, seeded_storage, PASSWORD, USERNAME};

fn stream_body(payloads: &[&str]) -> String {
    payloads
        .iter()
        .map(|data| SseMessage::new("message", *data).encode())
        .collect()
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

#[tokio::test]
async fn test_downloads_only_created_objects() {
    let server = MockServer::start().await;
    let body = stream_body(&[
        r#"{"event":"Create","info":"/node-b/data/a.txt"}"#,
        r#"{"event":"Write","info":"/node-b/data/b.txt"}"#,
        r#"{"event":"Remove","info":"/node-b/data/b.txt"}"#,
        r#"{"event":"Create","info":"/node-b/data/missing.txt"}"#,
        "Create /node-b/data/raw.txt",
    ]);
    Mock::given(method("GET"))
        .and(path("/stream"))
        .and(query_param("stream", "message"))
        .and(basic_auth(USERNAME, PASSWORD))
        .and(header("accept", "text/event-stream"))
        .respond_with(event_stream(body))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (store, storage) =
        seeded_storage(&[("a.txt", "alpha"), ("b.txt", "beta"), ("raw.txt", "raw")]).await;
    let consumer =
        NotificationConsumer::from_config(&notify_config(&server.uri()), storage, tmp.path())
            .unwrap();

    // Without reconnects, the end of the mocked stream ends the consumer
    let result = consumer.run(CancellationToken::new()).await;
    assert!(result.is_err());

    assert_eq!(
        std::fs::read_to_string(tmp.path().join("a.txt")).unwrap(),
        "alpha"
    );
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("raw.txt")).unwrap(),
        "raw"
    );
    assert!(!tmp.path().join("b.txt").exists());
    assert!(!tmp.path().join("missing.txt").exists());
    assert_eq!(store.calls().get, 3);
    assert_eq!(store.calls().list, 1);
}

#[tokio::test]
async fn test_rejected_subscription_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (_store, storage) = seeded_storage(&[]).await;
    let consumer =
        NotificationConsumer::from_config(&notify_config(&server.uri()), storage, tmp.path())
            .unwrap();

    let err = consumer.run(CancellationToken::new()).await.unwrap_err();
    assert!(format!("{err:#}").contains("401"));
}

#[tokio::test]
async fn test_startup_list_failure_is_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .respond_with(event_stream(String::new()))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (store, storage) = seeded_storage(&[]).await;
    store.set_failing(true);
    let consumer =
        NotificationConsumer::from_config(&notify_config(&server.uri()), storage, tmp.path())
            .unwrap();

    // The subscription still happens; only the stream end is reported
    let err = consumer.run(CancellationToken::new()).await.unwrap_err();
    assert!(format!("{err:#}").contains("closed"));
}

#[tokio::test]
async fn test_reconnects_until_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream"))
        .respond_with(event_stream(stream_body(&["ping"])))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let (_store, storage) = seeded_storage(&[]).await;
    let mut config = notify_config(&server.uri());
    config.reconnect = true;
    let consumer = NotificationConsumer::from_config(&config, storage, tmp.path())
        .unwrap()
        .with_initial_backoff(Duration::from_millis(10));

    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    let reconnected = eventually(|| async {
        server
            .received_requests()
            .await
            .map_or(false, |requests| requests.len() >= 3)
    })
    .await;
    assert!(reconnected);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_cancelled_before_start_returns_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let (_store, storage) = seeded_storage(&[]).await;
    // Nothing listens here; cancellation wins before any connection attempt
    let consumer =
        NotificationConsumer::from_config(&notify_config("http://127.0.0.1:9"), storage, tmp.path())
            .unwrap();

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    consumer.run(shutdown).await.unwrap();
}
