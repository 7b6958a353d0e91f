//! Embedded broadcast hub
//!
//! A small authenticated publish/subscribe server. Every node can run one;
//! publishers and consumers only need its URL.
//!
//! ## Endpoints
//!
//! - `POST /sync` - body must be an [`UpdateNotification`] JSON object. The
//!   message is fanned out to every connected subscriber and the response is
//!   `{"status":"ok","subscribers":N}`.
//! - `GET /stream?stream=<name>` - `text/event-stream` body. Each published
//!   message arrives as `event: <name>` with the JSON as `data`.
//!
//! Both endpoints require HTTP basic auth. Unknown routes answer 404.
//!
//! ## Design Notes
//!
//! - Fan-out uses a `tokio::sync::broadcast` channel. There is no history: a
//!   subscriber only sees messages published after it connected, and a
//!   subscriber that falls behind skips what it missed.
//! - On shutdown open streams end, then connections close gracefully.
//!   [`BroadcastHub::run`] returns only after every connection task has
//!   finished.
//! - A failed `accept` (for example when out of file descriptors) pauses
//!   the listener for [`ACCEPT_ERROR_BACKOFF`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{stream, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::header::{
    HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, WWW_AUTHENTICATE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use filesyncer_core::config::HubConfig;
use filesyncer_core::domain::UpdateNotification;

use crate::sse::SseMessage;

/// Messages buffered per subscriber before it starts lagging
pub const HUB_CHANNEL_CAPACITY: usize = 256;

/// Pause after a failed `accept` before listening again
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Event name used when a subscriber does not pass `stream`
pub const DEFAULT_STREAM: &str = "message";

type HubBody = UnsyncBoxBody<Bytes, Infallible>;

// ============================================================================
// Credentials
// ============================================================================

/// Basic auth pair every request must present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubCredentials {
    pub username: String,
    pub password: String,
}

impl HubCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Checks an `Authorization` header value against these credentials
    fn accepts(&self, header: Option<&HeaderValue>) -> bool {
        header
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Basic "))
            .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
            .and_then(|decoded| String::from_utf8(decoded).ok())
            .and_then(|pair| {
                pair.split_once(':')
                    .map(|(user, pass)| user == self.username && pass == self.password)
            })
            .unwrap_or(false)
    }
}

// ============================================================================
// BroadcastHub
// ============================================================================

struct HubState {
    sender: broadcast::Sender<Arc<str>>,
    credentials: HubCredentials,
}

/// HTTP server fanning published notifications out to subscribers
pub struct BroadcastHub {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<HubState>,
}

impl BroadcastHub {
    /// Binds the listen address from the hub configuration
    ///
    /// # Arguments
    /// * `config` - Hub section; `listen_addr` may use port 0
    /// * `credentials` - Basic auth pair required on every request
    ///
    /// # Errors
    /// Returns an error if the address does not parse or cannot be bound
    pub async fn bind(config: &HubConfig, credentials: HubCredentials) -> Result<Self> {
        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid hub listen address: {}", config.listen_addr))?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind hub on {addr}"))?;
        let local_addr = listener.local_addr()?;
        let (sender, _) = broadcast::channel(HUB_CHANNEL_CAPACITY);

        Ok(Self {
            listener,
            local_addr,
            state: Arc::new(HubState {
                sender,
                credentials,
            }),
        })
    }

    /// The bound address, useful when binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.state.sender.receiver_count()
    }

    /// Serves connections until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(addr = %self.local_addr, "Broadcast hub listening");
        let connections = TaskTracker::new();

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Broadcast hub shutting down");
                    break;
                }
                result = self.listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept hub connection");
                        if pause_after_accept_error(&shutdown).await {
                            continue;
                        }
                        info!("Broadcast hub shutting down");
                        break;
                    }
                },
            };

            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);
            let shutdown = shutdown.clone();

            connections.spawn(async move {
                let token = shutdown.clone();
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    let token = token.clone();
                    async move { Ok::<_, Infallible>(handle_request(req, &state, token).await) }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(e) = result {
                    debug!(%peer, error = %e, "Hub connection ended with error");
                }
            });
        }

        connections.close();
        debug!(open = connections.len(), "Waiting for hub connections to close");
        connections.wait().await;
        Ok(())
    }
}

/// Sleeps for [`ACCEPT_ERROR_BACKOFF`]; false if `shutdown` fired first
async fn pause_after_accept_error(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

// ============================================================================
// Request handling
// ============================================================================

async fn handle_request(
    req: Request<Incoming>,
    state: &HubState,
    shutdown: CancellationToken,
) -> Response<HubBody> {
    let route = match (req.method(), req.uri().path()) {
        (&Method::POST, "/sync") => Route::Publish,
        (&Method::GET, "/stream") => Route::Subscribe,
        _ => return text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    if !state.credentials.accepts(req.headers().get(AUTHORIZATION)) {
        debug!(path = req.uri().path(), "Rejected unauthenticated hub request");
        let mut response = text_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        response.headers_mut().insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"filesyncer\""),
        );
        return response;
    }

    match route {
        Route::Publish => publish(req, state).await,
        Route::Subscribe => subscribe(&req, state, shutdown),
    }
}

enum Route {
    Publish,
    Subscribe,
}

async fn publish(req: Request<Incoming>, state: &HubState) -> Response<HubBody> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Failed to read publish body");
            return text_response(StatusCode::BAD_REQUEST, "Unreadable body");
        }
    };

    let notification = match UpdateNotification::from_json(&String::from_utf8_lossy(&body)) {
        Ok(notification) => notification,
        Err(e) => return text_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let payload = match notification.to_json() {
        Ok(payload) => payload,
        Err(e) => return text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    // send fails only when nobody is listening
    let subscribers = state.sender.send(Arc::from(payload)).unwrap_or(0);
    info!(
        event = %notification.event,
        info = %notification.info,
        subscribers,
        "Broadcast notification"
    );

    let body = serde_json::json!({ "status": "ok", "subscribers": subscribers }).to_string();
    let mut response = text_response(StatusCode::OK, body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn subscribe(
    req: &Request<Incoming>,
    state: &HubState,
    shutdown: CancellationToken,
) -> Response<HubBody> {
    let name = stream_name(req.uri().query());
    let receiver = state.sender.subscribe();
    info!(
        stream = %name,
        subscribers = state.sender.receiver_count(),
        "Subscriber connected"
    );

    let hello = stream::once(async { Ok::<_, Infallible>(Frame::data(Bytes::from(": connected\n\n"))) });
    let frames = stream::unfold(
        (receiver, shutdown, name),
        |(mut receiver, shutdown, name)| async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return None,
                    next = receiver.recv() => next,
                };
                match next {
                    Ok(payload) => {
                        let frame = SseMessage::new(name.as_str(), &*payload).encode();
                        let item = Ok::<_, Infallible>(Frame::data(Bytes::from(frame)));
                        return Some((item, (receiver, shutdown, name)));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(stream = %name, skipped, "Subscriber lagging, messages skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    );

    let mut response = Response::new(StreamBody::new(hello.chain(frames)).boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn stream_name(query: Option<&str>) -> String {
    query
        .and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "stream")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_STREAM.to_string())
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<HubBody> {
    let mut response = Response::new(Full::new(body.into()).boxed_unsync());
    *response.status_mut() = status;
    response
}
