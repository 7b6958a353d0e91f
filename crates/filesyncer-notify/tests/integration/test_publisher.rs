//! Publisher against a mocked hub

use std::time::{Duration, Instant};

use filesyncer_core::domain::{FileOperation, UpdateNotification};
use filesyncer_core::ports::INotificationPublisher;
use filesyncer_notify::publisher::HttpNotificationPublisher;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{basic_auth, body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{notify_config, PASSWORD, USERNAME};

fn create_notice() -> UpdateNotification {
    UpdateNotification::for_operation(FileOperation::Create, "./test-folder/x.txt")
}

#[tokio::test]
async fn test_publish_posts_json_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .and(basic_auth(USERNAME, PASSWORD))
        .and(header("content-type", "application/json"))
        .and(body_json(serde_json::json!({
            "event": "Create",
            "info": "./test-folder/x.txt"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let publisher = HttpNotificationPublisher::from_config(&notify_config(&server.uri())).unwrap();
    publisher.publish(&create_notice()).await.unwrap();
}

#[tokio::test]
async fn test_publish_retries_then_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(500).set_body_string("hub down"))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = notify_config(&server.uri());
    config.publish_retries = 2;
    let publisher = HttpNotificationPublisher::from_config(&config)
        .unwrap()
        .with_backoff(Duration::from_millis(10));

    let err = publisher.publish(&create_notice()).await.unwrap_err();
    assert!(format!("{err:#}").contains("after 3 attempts"));
    assert!(format!("{err:#}").contains("500"));
}

#[tokio::test]
async fn test_publish_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = notify_config(&server.uri());
    config.publish_retries = 1;
    let publisher = HttpNotificationPublisher::from_config(&config)
        .unwrap()
        .with_backoff(Duration::from_millis(10));

    publisher.publish(&create_notice()).await.unwrap();
}

#[tokio::test]
async fn test_publish_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let mut config = notify_config(&server.uri());
    config.publish_timeout_secs = 1;
    let publisher = HttpNotificationPublisher::from_config(&config).unwrap();

    let started = Instant::now();
    assert!(publisher.publish(&create_notice()).await.is_err());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_unreachable_hub_is_an_error() {
    let config = notify_config("http://127.0.0.1:9");
    let publisher = HttpNotificationPublisher::from_config(&config).unwrap();
    assert!(publisher.publish(&create_notice()).await.is_err());
}

#[tokio::test]
async fn test_shutdown_cuts_retry_backoff_short() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = notify_config(&server.uri());
    config.publish_retries = 2;
    let shutdown = CancellationToken::new();
    let publisher = HttpNotificationPublisher::from_config(&config)
        .unwrap()
        .with_backoff(Duration::from_secs(1))
        .with_shutdown(shutdown.clone());

    let canceller = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            shutdown.cancel();
        })
    };

    let started = Instant::now();
    let err = publisher.publish(&create_notice()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(format!("{err:#}").contains("shutdown"));
    canceller.await.unwrap();
}
