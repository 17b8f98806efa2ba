//! The daemon (C11, §4.11): an axum WebSocket server exposing the wire
//! protocol in `protocol.rs` over a small set of named indexes held in
//! `IndexRegistry`. Grounded in the teacher's `server.rs` for the overall
//! `AppState`/CORS/error-response shape, and in
//! `vyotiq-ai-vyotiq-agent`'s `server.rs` for the split sender/receiver
//! WebSocket handler this module generalizes with request concurrency and
//! ordering (§4.11, §5).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream::FuturesOrdered;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, Mutex};

use crate::config::{self, DaemonConfig, DaemonSection};
use crate::embedding;
use crate::error::{Error, Result};
use crate::manifest::{self, Manifest};
use crate::protocol::{ClientRequest, IndexStatus, ServerResponse};
use crate::query_engine::{self, LoadedIndex, QueryRequest};
use crate::registry::IndexRegistry;

/// Loaded-index cache bound (§4.11 "evictable by LRU when a bound is
/// exceeded"). Not presently surfaced in config: eight concurrently-resident
/// indexes comfortably covers a single-user daemon's working set.
const LOADED_INDEX_CAP: usize = 8;

const MAX_INFLIGHT_PER_CONNECTION: usize = 16;
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(60);
const STATUS_INTERVAL: Duration = Duration::from_secs(15);
/// Requests accepted per connection per rolling one-second window before
/// `RATE_LIMITED` kicks in. No spec-mandated number; chosen generously for
/// a local single-user daemon.
const RATE_LIMIT_PER_SECOND: u32 = 100;

/// One cached, query-ready index plus the staleness check that decides
/// whether it needs reopening. There's no standing ingest task inside the
/// daemon process (ingest runs out-of-band via `gundogd ingest`, §10.5), so
/// "the builder flips the handle on publish" (§4.11, I5) is realized
/// opportunistically here: every dispatch compares the cached manifest's
/// `last_ingest` against what's on disk and reopens if they've diverged. A
/// query that already holds the old `Arc<LoadedIndex>` keeps running against
/// the pre-ingest snapshot undisturbed (P8).
struct IndexSlot {
    loaded: Arc<LoadedIndex>,
}

struct IndexCache {
    slots: Mutex<lru::LruCache<String, IndexSlot>>,
}

enum LoadOutcome {
    Ready(Arc<LoadedIndex>),
    Busy,
}

impl IndexCache {
    fn new() -> Self {
        Self { slots: Mutex::new(lru::LruCache::new(NonZeroUsize::new(LOADED_INDEX_CAP).unwrap())) }
    }

    async fn get(&self, name: &str, root: &Path) -> Result<LoadOutcome> {
        let manifest_path = root.join("manifest.json");
        if manifest::shadow_path(&manifest_path).exists() {
            return Ok(LoadOutcome::Busy);
        }
        let on_disk = Manifest::load(&manifest_path)?
            .ok_or_else(|| Error::IndexNotFound(format!("index '{name}' has not been ingested yet")))?;

        {
            let mut guard = self.slots.lock().await;
            if let Some(slot) = guard.get(name) {
                if slot.loaded.manifest.last_ingest == on_disk.last_ingest {
                    return Ok(LoadOutcome::Ready(slot.loaded.clone()));
                }
            }
        }

        let project_config = load_project_config(root)?;
        let embedder = embedding::build_embedder(&project_config.embedding);
        let loaded = Arc::new(LoadedIndex::open(root.to_path_buf(), project_config, embedder).await?);

        let mut guard = self.slots.lock().await;
        guard.put(name.to_string(), IndexSlot { loaded: loaded.clone() });
        Ok(LoadOutcome::Ready(loaded))
    }

    async fn loaded_names(&self) -> Vec<String> {
        self.slots.lock().await.iter().map(|(k, _)| k.clone()).collect()
    }
}

fn load_project_config(root: &Path) -> Result<config::Config> {
    config::load_config(&root.join("config.yaml"))
}

#[derive(Clone)]
struct DaemonState {
    registry: Arc<Mutex<IndexRegistry>>,
    cache: Arc<IndexCache>,
    started_at: Instant,
    status_tx: broadcast::Sender<String>,
    auth: Arc<config::AuthConfig>,
}

/// Starts the daemon: loads `~/.config/gundog/daemon.yaml` (or an explicit
/// override), builds the axum router, and serves until the process is
/// terminated (§4.11, §10.5 `gundogd serve`).
pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let daemon_config: DaemonConfig = config::load_daemon_config(config_path)?;
    let section = daemon_config.daemon;

    let registry = IndexRegistry::load(config_path)?;
    let (status_tx, _) = broadcast::channel(64);

    let state = DaemonState {
        registry: Arc::new(Mutex::new(registry)),
        cache: Arc::new(IndexCache::new()),
        started_at: Instant::now(),
        status_tx: status_tx.clone(),
        auth: Arc::new(section.auth.clone()),
    };

    spawn_status_broadcaster(state.clone());

    let app = build_router(state, &section);
    let listener = tokio::net::TcpListener::bind((section.host.as_str(), section.port)).await?;
    tracing::info!(host = %section.host, port = section.port, "gundogd listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: DaemonState, section: &DaemonSection) -> Router {
    let cors = if section.cors.allowed_origins.is_empty() {
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    } else {
        let origins: Vec<HeaderValue> =
            section.cors.allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
        tower_http::cors::CorsLayer::new().allow_origin(origins)
    };

    let protected = Router::new().route("/ws", get(ws_handler)).route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().route("/health", get(health_handler)).merge(protected).layer(cors).with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

/// Rejects requests missing a matching API key when `daemon.auth.enabled` is
/// set (§6.2); a daemon with auth disabled (the default, local-only posture)
/// skips this entirely.
async fn auth_middleware(State(state): State<DaemonState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    if !state.auth.enabled {
        return Ok(next.run(req).await);
    }
    let Some(expected) = state.auth.effective_key() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match provided {
        Some(key) if key == expected => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<DaemonState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

fn spawn_status_broadcaster(state: DaemonState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_INTERVAL);
        loop {
            interval.tick().await;
            if state.status_tx.receiver_count() == 0 {
                continue;
            }
            let uptime_seconds = state.started_at.elapsed().as_secs();
            let loaded = state.cache.loaded_names().await;
            let registry = state.registry.lock().await;
            let indexes: Vec<IndexStatus> = registry
                .list_names()
                .into_iter()
                .map(|(name, root)| {
                    let busy = manifest::shadow_path(&root.join("manifest.json")).exists();
                    let loaded = loaded.contains(&name);
                    IndexStatus { name, loaded, busy }
                })
                .collect();
            drop(registry);

            let frame = ServerResponse::Status { uptime_seconds, indexes };
            let _ = state.status_tx.send(frame.to_json_line());
        }
    });
}

/// Per-connection state: a bounded semaphore caps in-flight requests at
/// `MAX_INFLIGHT_PER_CONNECTION` (§5); a `FuturesOrdered` of join handles
/// preserves response order even though requests are dispatched
/// concurrently. A heartbeat ping/pong pair detects a dead peer within
/// `PONG_TIMEOUT`; disconnecting aborts every outstanding task at its next
/// `.await` point (tokio's cooperative task cancellation).
async fn handle_connection(socket: WebSocket, state: DaemonState) {
    tracing::info!("client connected");
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut status_rx = state.status_tx.subscribe();

    let semaphore = Arc::new(tokio::sync::Semaphore::new(MAX_INFLIGHT_PER_CONNECTION));
    let mut pending: FuturesOrdered<tokio::task::JoinHandle<String>> = FuturesOrdered::new();
    let mut abort_handles: Vec<tokio::task::AbortHandle> = Vec::new();

    let rate_count = Arc::new(AtomicU32::new(0));
    let mut rate_window = tokio::time::interval(Duration::from_secs(1));

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // first tick fires immediately; consume it
    let mut awaiting_pong = false;
    let mut last_heard_from = Instant::now();

    loop {
        tokio::select! {
            biased;

            maybe_msg = ws_receiver.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        last_heard_from = Instant::now();
                        if rate_count.fetch_add(1, Ordering::SeqCst) >= RATE_LIMIT_PER_SECOND {
                            let resp = ServerResponse::error(None, "RATE_LIMITED", "too many requests");
                            if ws_sender.send(Message::Text(resp.to_json_line().into())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        let permit = semaphore.clone();
                        let conn_state = state.clone();
                        let handle = tokio::spawn(async move {
                            let _permit = permit.acquire_owned().await.ok();
                            handle_request_text(&conn_state, &text).await
                        });
                        abort_handles.push(handle.abort_handle());
                        pending.push_back(handle);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                        last_heard_from = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }

            Some(result) = pending.next(), if !pending.is_empty() => {
                if let Ok(response_json) = result {
                    if ws_sender.send(Message::Text(response_json.into())).await.is_err() {
                        break;
                    }
                }
            }

            Ok(status_json) = status_rx.recv() => {
                if ws_sender.send(Message::Text(status_json.into())).await.is_err() {
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if awaiting_pong && last_heard_from.elapsed() > PONG_TIMEOUT {
                    tracing::warn!("client missed heartbeat, closing");
                    break;
                }
                if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            _ = rate_window.tick() => {
                rate_count.store(0, Ordering::SeqCst);
            }
        }
    }

    for handle in abort_handles {
        handle.abort();
    }
    tracing::info!("client disconnected");
}

async fn handle_request_text(state: &DaemonState, text: &str) -> String {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => return ServerResponse::error(None, "INVALID_REQUEST", format!("malformed request: {e}")).to_json_line(),
    };

    let response = match request {
        ClientRequest::Query { id, index, query, top_k, expand, expand_depth, min_score } => {
            dispatch_query(state, id, index, query, top_k, expand, expand_depth, min_score).await
        }
        ClientRequest::ListIndexes {} => dispatch_list_indexes(state).await,
        ClientRequest::SwitchIndex { index } => dispatch_switch_index(state, index).await,
    };
    response.to_json_line()
}

async fn resolve_index_name(state: &DaemonState, requested: Option<String>) -> Result<String> {
    if let Some(name) = requested {
        return Ok(name);
    }
    let registry = state.registry.lock().await;
    registry
        .default_name()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::InvalidRequest("no index specified and no default index is configured".to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_query(
    state: &DaemonState,
    id: String,
    index: Option<String>,
    query_text: String,
    top_k: Option<usize>,
    expand: Option<bool>,
    expand_depth: Option<u32>,
    min_score: Option<f32>,
) -> ServerResponse {
    let name = match resolve_index_name(state, index).await {
        Ok(n) => n,
        Err(e) => return ServerResponse::error(Some(id), e.code(), e.to_string()),
    };

    let root = {
        let registry = state.registry.lock().await;
        match registry.get(&name) {
            Some(r) => r.clone(),
            None => return ServerResponse::error(Some(id), "INDEX_NOT_FOUND", format!("no such index: {name}")),
        }
    };

    let loaded = match state.cache.get(&name, &root).await {
        Ok(LoadOutcome::Ready(loaded)) => loaded,
        Ok(LoadOutcome::Busy) => {
            return ServerResponse::error(Some(id), "INDEX_BUSY", format!("index '{name}' is ingesting"))
        }
        Err(e) => return ServerResponse::error(Some(id), e.code(), e.to_string()),
    };

    let req = QueryRequest { text: &query_text, top_k: top_k.unwrap_or(10), expand: expand.unwrap_or(false), expand_depth, min_score };
    let now = unix_now();

    match tokio::time::timeout(QUERY_TIMEOUT, query_engine::query(&loaded, req, now)).await {
        Ok(Ok(result)) => ServerResponse::QueryResult { id, index: name, direct: result.direct, related: result.related, graph: result.graph },
        Ok(Err(e)) => ServerResponse::error(Some(id), e.code(), e.to_string()),
        Err(_) => ServerResponse::error(Some(id), "TIMEOUT", "query exceeded the 30s budget"),
    }
}

async fn dispatch_list_indexes(state: &DaemonState) -> ServerResponse {
    let registry = state.registry.lock().await;
    ServerResponse::IndexList { indexes: registry.list() }
}

async fn dispatch_switch_index(state: &DaemonState, index: String) -> ServerResponse {
    let mut registry = state.registry.lock().await;
    match registry.set_default(&index) {
        Ok(()) => ServerResponse::IndexSwitched { index },
        Err(e) => ServerResponse::error(None, e.code(), e.to_string()),
    }
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
