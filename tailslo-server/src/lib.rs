use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tailslo_common::{ErrorResponse, DONE_SENTINEL};
use tokio::sync::watch;
use tracing::{debug, info};

pub mod config;
use config::{
    DEFAULT_CHUNKS, DEFAULT_FIRST_TOKEN_DELAY, DEFAULT_INTER_CHUNK_DELAY, DEFAULT_PORT,
    PREAMBLE_COMMENT,
};

/// Behaviour of the stub generation service.
#[derive(Debug, Clone)]
pub struct StubConfig {
    pub address: SocketAddr,
    /// Delay between accepting a request and emitting its first content frame.
    pub first_token_delay: Duration,
    pub inter_chunk_delay: Duration,
    pub chunks: usize,
    /// When `false` the body closes after the last chunk without `data: [DONE]`.
    pub send_done: bool,
    /// Answer every generation request with this status instead of streaming.
    pub error_status: Option<u16>,
    /// Park every stream before its first frame until [`ReleaseHandle::release`] is called.
    pub hold_open: bool,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            first_token_delay: DEFAULT_FIRST_TOKEN_DELAY,
            inter_chunk_delay: DEFAULT_INTER_CHUNK_DELAY,
            chunks: DEFAULT_CHUNKS,
            send_done: true,
            error_status: None,
            hold_open: false,
        }
    }
}

/// Counters observed by tests.
#[derive(Debug, Default)]
pub struct StubStats {
    pub requests_total: AtomicU64,
    pub streaming_requests: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubStats {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of generation requests that were open at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Counts one open request for as long as it is alive.
struct InFlightGuard(Arc<StubStats>);

impl InFlightGuard {
    fn enter(stats: Arc<StubStats>) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Unparks streams held by [`StubConfig::hold_open`].
#[derive(Clone)]
pub struct ReleaseHandle(Arc<watch::Sender<bool>>);

impl ReleaseHandle {
    pub fn release(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StubConfig>,
    pub stats: Arc<StubStats>,
    release: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(config: StubConfig) -> Self {
        let (release, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            stats: Arc::new(StubStats::default()),
            release: Arc::new(release),
        }
    }

    pub fn release_handle(&self) -> ReleaseHandle {
        ReleaseHandle(self.release.clone())
    }
}

/// Stub token-streaming generation server
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: StubConfig) -> Self {
        Self { state: AppState::new(config) }
    }

    /// Get the server's configured address
    pub fn address(&self) -> SocketAddr {
        self.state.config.address
    }

    pub fn stats(&self) -> Arc<StubStats> {
        self.state.stats.clone()
    }

    pub fn release_handle(&self) -> ReleaseHandle {
        self.state.release_handle()
    }

    /// Create the application router with the given state
    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/v1/chat/completions", post(handle_generate))
            .route("/v1/models", get(handle_models))
            .route("/health", get(handle_health))
            .with_state(state)
    }

    /// Run the server, signalling `ready_tx` with the bound address once accepting connections
    pub async fn run(self, ready_tx: tokio::sync::oneshot::Sender<SocketAddr>) -> Result<(), Box<dyn std::error::Error>> {
        let app = Self::create_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(self.state.config.address).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "stub service listening");
        ready_tx.send(local_addr).ok();
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

fn content_frame(index: usize) -> String {
    let chunk = json!({"choices": [{"index": 0, "delta": {"content": format!("tok{index} ")}}]});
    format!("data: {chunk}\n\n")
}

/// The frames of one streamed response, each paired with the delay that precedes it.
pub fn stream_frames(config: &StubConfig) -> VecDeque<(Duration, String)> {
    let mut frames = VecDeque::with_capacity(config.chunks + 2);
    frames.push_back((Duration::ZERO, PREAMBLE_COMMENT.to_string()));
    for i in 0..config.chunks {
        let delay = if i == 0 { config.first_token_delay } else { config.inter_chunk_delay };
        frames.push_back((delay, content_frame(i)));
    }
    if config.send_done {
        frames.push_back((Duration::ZERO, format!("data: {DONE_SENTINEL}\n\n")));
    }
    frames
}

struct StreamState {
    frames: VecDeque<(Duration, String)>,
    hold: Option<watch::Receiver<bool>>,
    _guard: InFlightGuard,
}

/// Handler for POST /v1/chat/completions. Streams SSE frames when `stream` is true,
/// otherwise answers with a single JSON body after the full generation delay.
pub async fn handle_generate(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    state.stats.requests_total.fetch_add(1, Ordering::SeqCst);
    let config = state.config.clone();

    if let Some(code) = config.error_status {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return error_response(status, "stub configured to fail");
    }

    let guard = InFlightGuard::enter(state.stats.clone());

    if body.get("stream").and_then(Value::as_bool) != Some(true) {
        let total = config.first_token_delay + config.inter_chunk_delay * config.chunks.saturating_sub(1) as u32;
        tokio::time::sleep(total).await;
        drop(guard);
        let text: String = (0..config.chunks).map(|i| format!("tok{i} ")).collect();
        return Json(json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]}))
            .into_response();
    }

    state.stats.streaming_requests.fetch_add(1, Ordering::SeqCst);
    let stream_state = StreamState {
        frames: stream_frames(&config),
        hold: config.hold_open.then(|| state.release.subscribe()),
        _guard: guard,
    };
    debug!(frames = stream_state.frames.len(), "streaming response");

    let frames = stream::unfold(stream_state, |mut s| async move {
        let (delay, frame) = s.frames.pop_front()?;
        if let Some(mut hold) = s.hold.take() {
            // A dropped sender also unparks the stream.
            let _ = hold.wait_for(|released| *released).await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Some((Ok::<_, Infallible>(frame), s))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to build stream"))
}

/// Handler for GET /v1/models, the readiness probe used by OpenAI-compatible servers.
pub async fn handle_models() -> Response {
    Json(json!({"object": "list", "data": [{"id": "tailslo-stub", "object": "model"}]})).into_response()
}

/// Handler for GET /health
pub async fn handle_health() -> Response {
    StatusCode::OK.into_response()
}
