//! HTTP transport (C7, §4.7): binds the avatar gateway's Router to a
//! listener that negotiates HTTP/2 cleartext (h2c) per connection.
//! `axum::serve` alone only ever speaks HTTP/1.1 over a bare
//! `TcpListener`, so the accept loop here is hand-rolled around
//! `hyper_util`'s auto connection builder instead, mirroring the
//! background-accept-task-plus-`JoinHandle` shape used for the local LLM
//! HTTP server.

use crate::adapters::AdapterSet;
use crate::chunker::TextChunker;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::pipeline::history::DialogueHistory;
use crate::pipeline::{self, PipelineContext, TurnInput};
use crate::store::AssetStore;
use crate::video_server::{self, VideoServerState};
use axum::extract::{Multipart, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::Stream;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use uuid::Uuid;

/// Shared application state for every route.
#[derive(Clone)]
struct AppState {
    adapters: Arc<AdapterSet>,
    context: PipelineContext,
    turn_semaphore: Arc<Semaphore>,
    active_turns: Arc<AtomicU64>,
    start_time: Instant,
}

/// The running HTTP transport. Accepts connections in a background task
/// until dropped or explicitly [`shutdown`](Self::shutdown).
pub struct GatewayServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl GatewayServer {
    /// Builds the adapter bundle, asset store, and router from `config`,
    /// binds `config.transport.bind_addr`, and begins accepting
    /// connections in a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the asset store's root directory cannot be
    /// created or if the listener cannot bind.
    pub async fn start(config: GatewayConfig) -> Result<Self> {
        let adapters = AdapterSet::stubs(&config.llm);
        Self::start_with_adapters(config, adapters).await
    }

    /// Same as [`start`](Self::start), but with a caller-supplied adapter
    /// bundle instead of the built-in stubs. Exists so tests can swap in an
    /// adapter with injected latency to exercise timing-sensitive behavior
    /// (e.g. a client disconnecting mid-turn) against a real running server.
    pub async fn start_with_adapters(config: GatewayConfig, adapters: AdapterSet) -> Result<Self> {
        let adapters = Arc::new(adapters);
        let store = Arc::new(AssetStore::new(&config.asset_store)?);
        let chunker = Arc::new(TextChunker::new(config.chunker.clone()));

        let state = AppState {
            adapters,
            context: PipelineContext {
                store: Arc::clone(&store),
                chunker,
                history: DialogueHistory::new(),
                pipeline_config: config.pipeline.clone(),
                llm_config: config.llm.clone(),
            },
            turn_semaphore: Arc::new(Semaphore::new(config.pipeline.max_concurrent_turns.max(1))),
            active_turns: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        };

        let conversation_routes = Router::new()
            .route("/conversation/stream", post(handle_conversation_stream))
            .route("/health", get(handle_health))
            .route("/metrics", get(handle_metrics))
            .with_state(state);

        let video_routes = Router::new()
            .route("/videos/{artifact_id}", get(video_server::serve_video))
            .with_state(VideoServerState { store });

        let static_routes = Router::new().fallback_service(ServeDir::new("web"));

        let app = conversation_routes.merge(video_routes).merge(static_routes);

        let listener = TcpListener::bind(&config.transport.bind_addr)
            .await
            .map_err(|e| GatewayError::Internal(format!("bind {}: {e}", config.transport.bind_addr)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Internal(format!("local_addr: {e}")))?;

        tracing::info!(%addr, protocol = %config.transport.protocol, "avatar gateway listening");

        let handle = tokio::spawn(accept_loop(listener, app));

        Ok(Self { addr, handle })
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept_loop(listener: TcpListener, app: Router) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                tracing::debug!(%peer_addr, error = %e, "connection closed with error");
            }
        });
    }
}

/// `GET /health`.
async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_s": state.start_time.elapsed().as_secs(),
    }))
}

/// `GET /metrics` — ambient plain-text gauges, not wired to a full metrics
/// crate since none is in the inherited dependency stack.
async fn handle_metrics(State(state): State<AppState>) -> String {
    format!(
        "avatar_gateway_uptime_seconds {}\navatar_gateway_active_turns {}\n",
        state.start_time.elapsed().as_secs(),
        state.active_turns.load(Ordering::Relaxed),
    )
}

/// `POST /conversation/stream` — accepts a multipart upload (`audio`,
/// `portrait`, `voice_reference`, optional `language_hint`) and returns an
/// SSE stream of Turn events (§6.1, §6.2).
async fn handle_conversation_stream(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, (axum::http::StatusCode, String)> {
    let mut audio = None;
    let mut portrait = None;
    let mut voice_reference = None;
    let mut language_hint = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (axum::http::StatusCode::BAD_REQUEST, e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "audio" => {
                audio = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| (axum::http::StatusCode::BAD_REQUEST, e.to_string()))?
                        .to_vec(),
                );
            }
            "portrait" => {
                portrait = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| (axum::http::StatusCode::BAD_REQUEST, e.to_string()))?
                        .to_vec(),
                );
            }
            "voice_reference" => {
                voice_reference = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| (axum::http::StatusCode::BAD_REQUEST, e.to_string()))?
                        .to_vec(),
                );
            }
            "language_hint" => {
                language_hint = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| (axum::http::StatusCode::BAD_REQUEST, e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let audio = audio.ok_or((axum::http::StatusCode::BAD_REQUEST, "missing audio field".to_owned()))?;
    let portrait = portrait.ok_or((axum::http::StatusCode::BAD_REQUEST, "missing portrait field".to_owned()))?;
    let voice_reference = voice_reference
        .ok_or((axum::http::StatusCode::BAD_REQUEST, "missing voice_reference field".to_owned()))?;

    let turn_id = Uuid::new_v4();
    let (writer, rx) = crate::sse::SseWriter::open(turn_id);

    let adapters = Arc::clone(&state.adapters);
    let context = state.context.clone();
    let semaphore = Arc::clone(&state.turn_semaphore);
    let active_turns = Arc::clone(&state.active_turns);
    let cancellation = CancellationToken::new();
    let cancel_guard = CancelOnDrop(cancellation.clone());

    tokio::spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        active_turns.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = pipeline::run_turn(
            &adapters,
            &context,
            &writer,
            &cancellation,
            &TurnInput {
                user_audio: &audio,
                language_hint: language_hint.as_deref(),
                portrait_ref: &portrait,
                voice_ref: &voice_reference,
            },
        )
        .await
        {
            tracing::warn!(%turn_id, error = %err, "turn ended without a clean sse close");
        }
        active_turns.fetch_sub(1, Ordering::Relaxed);
    });

    let stream = async_stream::stream! {
        let _cancel_guard = cancel_guard;
        let mut rx = rx;
        while let Some(frame) = rx.recv().await {
            yield Ok::<_, Infallible>(Event::default().event(frame.kind).data(frame.data));
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Cancels the Turn's [`CancellationToken`] when the SSE body stream is
/// dropped — the client disconnecting (or the stream running to
/// completion) ends the async generator driving it, which drops this guard
/// and propagates cancellation into `run_turn`'s in-flight adapter calls.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
