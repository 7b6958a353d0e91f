//! Broadcast hub over real HTTP

use std::time::Duration;

use filesyncer_core::domain::{FileOperation, UpdateNotification};
use filesyncer_core::ports::INotificationPublisher;
use filesyncer_notify::consumer::NotificationConsumer;
use filesyncer_notify::publisher::HttpNotificationPublisher;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::common::{
    eventually, next_message, notify_config, open_events, seeded_storage, start_hub, PASSWORD,
    USERNAME,
};

async fn subscribe(url: &str, stream: &str) -> reqwest::Response {
    let response = reqwest::Client::new()
        .get(format!("{url}/stream?stream={stream}"))
        .basic_auth(USERNAME, Some(PASSWORD))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    response
}

#[tokio::test]
async fn test_publish_fans_out_to_every_subscriber() {
    let running = start_hub().await;
    let mut first = open_events(&running.url, "updates").await;
    let mut second = open_events(&running.url, "message").await;
    let hub = running.hub.clone();
    assert!(eventually(|| async { hub.subscriber_count() == 2 }).await);

    let publisher =
        HttpNotificationPublisher::from_config(&notify_config(&running.url)).unwrap();
    let notice = UpdateNotification::for_operation(FileOperation::Create, "/data/x.txt");
    publisher.publish(&notice).await.unwrap();

    let message = next_message(&mut first).await;
    assert_eq!(message.event, "updates");
    assert_eq!(UpdateNotification::from_json(&message.data).unwrap(), notice);

    let message = next_message(&mut second).await;
    assert_eq!(message.event, "message");
    assert_eq!(UpdateNotification::from_json(&message.data).unwrap(), notice);

    first.close();
    second.close();
    running.shutdown.cancel();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_publish_reports_subscriber_count() {
    let running = start_hub().await;

    let response = reqwest::Client::new()
        .post(format!("{}/sync", running.url))
        .basic_auth(USERNAME, Some(PASSWORD))
        .json(&UpdateNotification::new("Create", "a.txt"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "status": "ok", "subscribers": 0 }));

    running.shutdown.cancel();
}

#[tokio::test]
async fn test_requests_without_credentials_are_rejected() {
    let running = start_hub().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/sync", running.url))
        .json(&UpdateNotification::new("Create", "a.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));

    let response = client
        .get(format!("{}/stream", running.url))
        .basic_auth(USERNAME, Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(running.hub.subscriber_count(), 0);

    running.shutdown.cancel();
}

#[tokio::test]
async fn test_invalid_body_and_unknown_route() {
    let running = start_hub().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/sync", running.url))
        .basic_auth(USERNAME, Some(PASSWORD))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .get(format!("{}/metrics", running.url))
        .basic_auth(USERNAME, Some(PASSWORD))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .get(format!("{}/sync", running.url))
        .basic_auth(USERNAME, Some(PASSWORD))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    running.shutdown.cancel();
}

#[tokio::test]
async fn test_creation_notice_reaches_consumer_download() {
    let running = start_hub().await;
    let tmp = tempfile::tempdir().unwrap();
    let (store, storage) = seeded_storage(&[("report.csv", "a,b,c")]).await;

    let consumer =
        NotificationConsumer::from_config(&notify_config(&running.url), storage, tmp.path())
            .unwrap();
    let consumer_shutdown = CancellationToken::new();
    let consumer_task = {
        let shutdown = consumer_shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    let hub = running.hub.clone();
    assert!(eventually(|| async { hub.subscriber_count() == 1 }).await);

    let publisher =
        HttpNotificationPublisher::from_config(&notify_config(&running.url)).unwrap();
    publisher
        .publish(&UpdateNotification::for_operation(
            FileOperation::Create,
            "./node-a/reports/report.csv",
        ))
        .await
        .unwrap();
    publisher
        .publish(&UpdateNotification::for_operation(
            FileOperation::Remove,
            "./node-a/reports/report.csv",
        ))
        .await
        .unwrap();

    let target = tmp.path().join("report.csv");
    let downloaded = eventually(|| async {
        std::fs::read_to_string(&target).map_or(false, |body| body == "a,b,c")
    })
    .await;
    assert!(downloaded);

    consumer_shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), consumer_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(store.calls().get, 1);

    running.shutdown.cancel();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let running = start_hub().await;
    let response = subscribe(&running.url, "message").await;
    let hub = running.hub.clone();
    assert!(eventually(|| async { hub.subscriber_count() == 1 }).await);

    running.shutdown.cancel();
    running.task.await.unwrap().unwrap();
    // Every connection has unwound by the time the hub returns
    assert_eq!(running.hub.subscriber_count(), 0);

    // The body finishes instead of hanging once the hub stops
    let body = tokio::time::timeout(Duration::from_secs(5), response.text())
        .await
        .unwrap()
        .unwrap_or_default();
    assert!(!body.contains("data:"));
}
