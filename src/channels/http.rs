//! HTTP webhook channel.
//!
//! Routes:
//! - `GET /health`
//! - `POST /webhook` submit a message, optionally waiting for the reply
//! - `GET /tools` the tool catalog with input schemas
//! - `POST /tools/{name}` invoke one tool; always waits for the reply
//!
//! Tool calls enter the agent as ordinary messages carrying a pre-built
//! decision, so they go through the same dispatcher as everything else.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::agent::DECISION_KEY;
use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::config::HttpConfig;
use crate::error::ChannelError;
use crate::tools::{ToolCatalog, ToolSpec};

/// Maximum JSON body size (64 KB).
const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_CONTENT_BYTES: usize = 32 * 1024;
const MAX_PENDING_RESPONSES: usize = 100;
const MAX_REQUESTS_PER_MINUTE: u32 = 60;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpChannel {
    config: HttpConfig,
    state: Arc<HttpState>,
}

struct HttpState {
    tx: RwLock<Option<mpsc::Sender<IncomingMessage>>>,
    /// Waiters for synchronous replies, keyed by message id.
    pending: RwLock<HashMap<Uuid, oneshot::Sender<String>>>,
    secret: Option<SecretString>,
    user_id: String,
    catalog: ToolCatalog,
    rate_limit: Mutex<RateLimit>,
}

#[derive(Debug)]
struct RateLimit {
    window_start: Instant,
    count: u32,
}

impl HttpState {
    fn check_secret(&self, provided: Option<&str>) -> Result<(), (StatusCode, Json<SubmitResponse>)> {
        let Some(expected) = &self.secret else {
            return Ok(());
        };
        match provided {
            Some(p) if p == expected.expose_secret() => Ok(()),
            Some(_) => Err(reject(StatusCode::UNAUTHORIZED, "Invalid webhook secret")),
            None => Err(reject(StatusCode::UNAUTHORIZED, "Webhook secret required")),
        }
    }

    async fn check_rate(&self) -> Result<(), (StatusCode, Json<SubmitResponse>)> {
        let mut limiter = self.rate_limit.lock().await;
        if limiter.window_start.elapsed() >= Duration::from_secs(60) {
            limiter.window_start = Instant::now();
            limiter.count = 0;
        }
        limiter.count += 1;
        if limiter.count > MAX_REQUESTS_PER_MINUTE {
            return Err(reject(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"));
        }
        Ok(())
    }
}

impl HttpChannel {
    pub fn new(config: HttpConfig) -> Self {
        let state = Arc::new(HttpState {
            tx: RwLock::new(None),
            pending: RwLock::new(HashMap::new()),
            secret: config.webhook_secret.clone(),
            user_id: config.user_id.clone(),
            catalog: ToolCatalog::new(),
            rate_limit: Mutex::new(RateLimit {
                window_start: Instant::now(),
                count: 0,
            }),
        });
        Self { config, state }
    }

    /// The channel's routes. Until `start()` runs, submissions get 503.
    pub fn routes(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/webhook", post(webhook_handler))
            .route("/tools", get(list_tools_handler))
            .route("/tools/{name}", post(call_tool_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(self.state.clone())
    }
}

#[derive(Debug, Deserialize)]
struct WebhookRequest {
    content: String,
    thread_id: Option<String>,
    secret: Option<String>,
    #[serde(default)]
    wait_for_response: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ToolCallRequest {
    secret: Option<String>,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubmitResponse {
    message_id: Uuid,
    status: String,
    response: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    channel: &'static str,
}

fn reject(status: StatusCode, reason: &str) -> (StatusCode, Json<SubmitResponse>) {
    (
        status,
        Json(SubmitResponse {
            message_id: Uuid::nil(),
            status: "error".to_string(),
            response: Some(reason.to_string()),
        }),
    )
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        channel: "http",
    })
}

async fn webhook_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<WebhookRequest>,
) -> (StatusCode, Json<SubmitResponse>) {
    if let Err(rejection) = state.check_rate().await {
        return rejection;
    }
    if let Err(rejection) = state.check_secret(req.secret.as_deref()) {
        return rejection;
    }
    if req.content.len() > MAX_CONTENT_BYTES {
        return reject(StatusCode::PAYLOAD_TOO_LARGE, "Content too large");
    }

    let mut msg = IncomingMessage::new("http", &state.user_id, &req.content);
    if let Some(thread_id) = &req.thread_id {
        msg = msg.with_thread(thread_id);
    }
    submit(state, msg, req.wait_for_response).await
}

async fn list_tools_handler(State(state): State<Arc<HttpState>>) -> Json<Vec<ToolSpec>> {
    Json(state.catalog.tools().to_vec())
}

async fn call_tool_handler(
    State(state): State<Arc<HttpState>>,
    Path(name): Path<String>,
    body: Option<Json<ToolCallRequest>>,
) -> (StatusCode, Json<SubmitResponse>) {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    if let Err(rejection) = state.check_rate().await {
        return rejection;
    }
    if let Err(rejection) = state.check_secret(req.secret.as_deref()) {
        return rejection;
    }

    let decision = match state.catalog.to_decision(&name, &req.args) {
        Ok(decision) => decision,
        Err(crate::tools::ToolError::NotFound(reason)) => {
            return reject(StatusCode::NOT_FOUND, &reason);
        }
        Err(e) => return reject(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let msg = IncomingMessage::new("http", &state.user_id, format!("tool:{}", name))
        .with_metadata(serde_json::json!({ DECISION_KEY: decision }));
    submit(state, msg, true).await
}

/// Hand a message to the agent, optionally waiting for its reply.
async fn submit(
    state: Arc<HttpState>,
    msg: IncomingMessage,
    wait_for_response: bool,
) -> (StatusCode, Json<SubmitResponse>) {
    let msg_id = msg.id;

    let response_rx = if wait_for_response {
        let mut pending = state.pending.write().await;
        if pending.len() >= MAX_PENDING_RESPONSES {
            return reject(StatusCode::TOO_MANY_REQUESTS, "Too many pending requests");
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(msg_id, tx);
        Some(rx)
    } else {
        None
    };

    let sent = {
        let guard = state.tx.read().await;
        match guard.as_ref() {
            Some(tx) => tx.send(msg).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR),
            None => Err(StatusCode::SERVICE_UNAVAILABLE),
        }
    };
    if let Err(status) = sent {
        state.pending.write().await.remove(&msg_id);
        let reason = if status == StatusCode::SERVICE_UNAVAILABLE {
            "Channel not started"
        } else {
            "Channel closed"
        };
        return reject(status, reason);
    }

    let response = match response_rx {
        Some(rx) => Some(match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(content)) => content,
            Ok(Err(_)) => "Response cancelled".to_string(),
            Err(_) => "Response timeout".to_string(),
        }),
        None => None,
    };
    state.pending.write().await.remove(&msg_id);

    (
        StatusCode::OK,
        Json(SubmitResponse {
            message_id: msg_id,
            status: "accepted".to_string(),
            response,
        }),
    )
}

#[async_trait]
impl Channel for HttpChannel {
    fn name(&self) -> &str {
        "http"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        if self.state.secret.is_none() {
            return Err(ChannelError::StartupFailed {
                name: "http".to_string(),
                reason: "HTTP secret is required (set KVCLAW_HTTP_SECRET)".to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(256);
        *self.state.tx.write().await = Some(tx);

        tracing::info!("HTTP channel ready ({}:{})", self.config.host, self.config.port);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        if let Some(tx) = self.state.pending.write().await.remove(&msg.id) {
            let _ = tx.send(response.content);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        if self.state.tx.read().await.is_some() {
            Ok(())
        } else {
            Err(ChannelError::HealthCheckFailed {
                name: "http".to_string(),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        *self.state.tx.write().await = None;
        Ok(())
    }
}

/// A running HTTP server.
pub struct HttpServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HttpServer {
    /// Bind `addr` and serve `routes` on a background task.
    pub async fn start(routes: Router, addr: SocketAddr) -> Result<Self, ChannelError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "http".to_string(),
                reason: format!("Failed to bind to {}: {}", addr, e),
            })?;
        tracing::info!("HTTP server listening on {}", addr);

        let app = routes.layer(TraceLayer::new_for_http());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("HTTP server shutting down");
                })
                .await;
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
