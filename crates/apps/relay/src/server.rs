//! HTTP and WebSocket surface of the relay

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderName, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use tempmail::{
    FileAddressPool, FileWatermarkStore, GmailAuth, GmailClient, GmailCredentials, InboxEvent,
    InboxStore, Notifier, PoolError, ServiceConfig, SyncEngine,
};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

use crate::dispatch::SyncDispatcher;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub pool: Arc<FileAddressPool>,
    pub dispatcher: SyncDispatcher,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>, pool: Arc<FileAddressPool>) -> Self {
        Self {
            dispatcher: SyncDispatcher::new(engine.clone()),
            engine,
            pool,
        }
    }

    fn inboxes(&self) -> &InboxStore {
        self.engine.inboxes()
    }
}

/// Wire the production stores and Gmail client together
///
/// Every address the pool has handed out gets an (empty) inbox again, so
/// mail for them keeps being routed across restarts.
pub fn build_state(config: &ServiceConfig) -> Result<AppState> {
    let credentials = GmailCredentials::load().context("Gmail OAuth credentials not configured")?;
    let auth = GmailAuth::new(credentials, config.token_path()?);
    if !auth.is_authorized() {
        warn!(
            "No Gmail token at {}; run `relay authorize` before mail can sync",
            auth.token_path().display()
        );
    }

    let client = GmailClient::new(auth, config.request_timeout())
        .with_label_filter(config.label_filter.clone())
        .with_max_attempts(config.fetch_retries);

    let pool = Arc::new(FileAddressPool::new(config.pool_path()?));
    let inboxes = Arc::new(InboxStore::new());
    let assigned = pool.assigned().context("Failed to read address pool")?;
    let restored = inboxes.activate_all(assigned.iter().map(String::as_str));
    info!("Restored {} active inboxes from {}", restored, pool.path().display());

    let engine = Arc::new(SyncEngine::new(
        Arc::new(client),
        Arc::new(FileWatermarkStore::new(config.state_path()?)),
        inboxes,
        Notifier::default(),
    ));

    Ok(AppState::new(engine, pool))
}

/// Create the router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("ngrok-skip-browser-warning"),
        ]);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/new-address", get(new_address))
        .route("/api/mark-used", post(mark_used))
        .route("/api/addresses", get(list_addresses))
        .route("/api/inbox/:address", get(get_inbox))
        // Pub/Sub push endpoint
        .route("/webhook/pubsub-push", post(pubsub_push))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(config: ServiceConfig) -> Result<()> {
    let state = build_state(&config)?;
    let app = router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Relay listening on http://{}", addr);

    axum::serve(listener, app).await.context("HTTP server failed")
}

/// JSON error body with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted => Self::new(
                StatusCode::NOT_FOUND,
                "No available email addresses. All aliases are currently in use.",
            ),
            PoolError::NotFound(address) => {
                debug!("Unknown address {}", address);
                Self::new(StatusCode::NOT_FOUND, "Address not found")
            }
            PoolError::Storage(e) => {
                error!("Address pool failure: {:#}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Address pool unavailable")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let inboxes = state.inboxes();
    Json(json!({
        "status": "ok",
        "message": "Relay is running",
        "timestamp": chrono::Utc::now(),
        "activeInboxes": inboxes.active_addresses(),
        "bufferedMessages": inboxes.message_count(),
        "liveClients": state.engine.notifier().subscriber_count(),
        "sync": state.engine.status(),
    }))
}

async fn new_address(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let address = state.pool.assign_next()?;
    state.inboxes().activate(&address);
    info!("Handed out {}", address);
    Ok(Json(json!({ "address": address })))
}

#[derive(Debug, Deserialize)]
struct MarkUsedRequest {
    address: Option<String>,
}

async fn mark_used(
    State(state): State<AppState>,
    Json(request): Json<MarkUsedRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let address = request
        .address
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "Address is required"))?;

    let changed = state.pool.retire(&address)?;
    let discarded = state.inboxes().retire(&address).unwrap_or(0);
    if changed {
        info!("Retired {} ({} messages discarded)", address, discarded);
    }

    Ok(Json(json!({ "message": "Address marked as used and retired" })))
}

async fn list_addresses(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.pool.list()?))
}

async fn get_inbox(State(state): State<AppState>, Path(address): Path<String>) -> impl IntoResponse {
    Json(state.inboxes().list(&address))
}

/// Acknowledge immediately; the sync runs in the background
async fn pubsub_push(State(state): State<AppState>) -> StatusCode {
    let started = state.dispatcher.trigger();
    debug!("Push notification received (new run: {})", started);
    StatusCode::NO_CONTENT
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let notifier = state.engine.notifier().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, notifier))
}

async fn handle_socket(socket: WebSocket, notifier: Notifier) {
    let (mut sender, mut receiver) = socket.split();
    // subscribe before greeting so nothing published in between is missed
    let mut updates = notifier.subscribe();
    info!("WebSocket client connected ({} total)", notifier.subscriber_count());

    if send_event(&mut sender, &InboxEvent::Connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client fell behind; skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                // pings are answered by axum itself
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!("WebSocket client disconnected");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &InboxEvent,
) -> Result<(), axum::Error> {
    let json = event.to_json().map_err(axum::Error::new)?;
    sender.send(Message::Text(json)).await
}
