//! Shared fixtures for notify tests

use std::sync::Arc;
use std::time::Duration;

use filesyncer_core::config::{HubConfig, NotifyConfig};
use filesyncer_core::domain::ObjectName;
use filesyncer_notify::hub::{BroadcastHub, HubCredentials};
use eventsource_stream::Event as MessageEvent;
use filesyncer_sync::memory::MemoryObjectStore;
use filesyncer_sync::storage::{StorageSync, StorageTimeouts};
use futures_util::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "admin123";

/// Notify settings pointing at `hub_url`, without reconnects or retries
pub fn notify_config(hub_url: &str) -> NotifyConfig {
    NotifyConfig {
        hub_url: hub_url.to_string(),
        username: USERNAME.into(),
        password: PASSWORD.into(),
        stream: "message".into(),
        publish_timeout_secs: 2,
        publish_retries: 0,
        reconnect: false,
        ..NotifyConfig::default()
    }
}

/// In-memory bucket seeded with `objects`, wrapped in a storage adapter
pub async fn seeded_storage(
    objects: &[(&str, &str)],
) -> (Arc<MemoryObjectStore>, Arc<StorageSync>) {
    let store = Arc::new(MemoryObjectStore::new());
    for (name, body) in objects {
        store.insert(ObjectName::new(*name).unwrap(), *body).await;
    }
    let storage = Arc::new(StorageSync::new(
        store.clone(),
        StorageTimeouts::default(),
        "notify-test",
    ));
    (store, storage)
}

pub struct RunningHub {
    pub hub: Arc<BroadcastHub>,
    pub url: String,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<anyhow::Result<()>>,
}

/// Binds a hub on an ephemeral port and starts serving
pub async fn start_hub() -> RunningHub {
    let config = HubConfig {
        enabled: true,
        listen_addr: "127.0.0.1:0".into(),
    };
    let hub = Arc::new(
        BroadcastHub::bind(&config, HubCredentials::new(USERNAME, PASSWORD))
            .await
            .unwrap(),
    );
    let url = format!("http://{}", hub.local_addr());
    let shutdown = CancellationToken::new();
    let task = {
        let hub = hub.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { hub.run(shutdown).await })
    };
    RunningHub {
        hub,
        url,
        shutdown,
        task,
    }
}

/// Opens an authenticated event source on the hub and waits until it is
/// connected
pub async fn open_events(url: &str, stream: &str) -> EventSource {
    let request = reqwest::Client::new()
        .get(format!("{url}/stream?stream={stream}"))
        .basic_auth(USERNAME, Some(PASSWORD));
    let mut events = EventSource::new(request).unwrap();
    let opened = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("not connected within 5s");
    assert!(matches!(opened, Some(Ok(Event::Open))));
    events
}

/// Waits for the next message on an open event source
pub async fn next_message(events: &mut EventSource) -> MessageEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.next().await.expect("stream ended").unwrap() {
                Event::Open => continue,
                Event::Message(message) => return message,
            }
        }
    })
    .await
    .expect("no message within 5s")
}

/// Polls `check` until it returns true or five seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
