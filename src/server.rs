//! HTTP server for the browser front end.
//!
//! Each browser tab owns a [`Session`], identified by the `x-session-id`
//! header. Requests without a known id get a fresh session, and every
//! response carries the id to use next time. A session is locked for the
//! whole of a request, so uploads, chat turns and generation never overlap
//! within one session.
//!
//! The built-in document is indexed once at startup; new sessions share
//! that [`Baseline`]. At most `server.max_sessions` sessions are kept:
//! sessions idle for `server.session_ttl_secs` are dropped, and when the
//! store is full the least recently used one makes room.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `DELETE` | `/session` | Forget the caller's session |
//! | `GET`  | `/documents` | Loaded and flagged documents, index size |
//! | `POST` | `/documents` | Multipart PDF upload; rebuilds the index |
//! | `DELETE` | `/documents/{filename}` | Remove an upload; rebuilds the index |
//! | `GET`  | `/chat` | Conversation so far |
//! | `POST` | `/chat` | Send a message; streams the reply as SSE |
//! | `POST` | `/search` | Top-k chunks for a query |
//! | `POST` | `/study` | Generate study materials |
//! | `POST` | `/study/download` | Generate and download one format |
//!
//! # Chat stream
//!
//! `POST /chat` answers with `text/event-stream`: zero or more `delta`
//! events (`{"text": "..."}`), then one `done` event carrying the outcome.
//! Closing the connection cancels the response; whatever arrived so far is
//! kept as a partial turn.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Please enter a topic first." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upload_error` (400),
//! `embedding_error` (502), `completion_error` (502), `internal` (500).

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use study_harness_core::embedding::EmbeddingProvider;
use study_harness_core::models::Turn;
use study_harness_core::search::RetrievedChunk;

use crate::chat::{send_message, ChatOutcome};
use crate::completion::{create_completion_provider, CompletionProvider};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::StudyError;
use crate::export::{render, render_all, Format};
use crate::extract::is_pdf_filename;
use crate::ingest::Upload;
use crate::session::{Baseline, Session, SessionStatus, SkippedUpload, UploadReport};
use crate::study::{generate_for_session, StudyMaterials};

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    /// Built once at startup and shared by every new session.
    baseline: Option<Baseline>,
    sessions: Arc<SessionStore>,
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let completer = create_completion_provider(&config.completion)?;
    let bind_addr = config.server.bind.clone();

    let app = app(Arc::new(config.clone()), embedder, completer).await?;

    println!("Study server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application: index the built-in document, then route.
pub async fn app(
    config: Arc<Config>,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
) -> anyhow::Result<Router> {
    let baseline = Baseline::load(&config, embedder.as_ref()).await?;
    if baseline.is_none() {
        tracing::warn!("no [session] default_document configured; sessions start empty");
    }
    let sessions = Arc::new(SessionStore::new(&config));
    Ok(router(AppState {
        config,
        embedder,
        completer,
        baseline,
        sessions,
    }))
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::HeaderName::from_static(SESSION_HEADER)]);
    let upload_limit = state.config.server.max_upload_mb * 1024 * 1024;

    Router::new()
        .route("/health", get(handle_health))
        .route("/session", delete(handle_end_session))
        .route(
            "/documents",
            get(handle_status)
                .post(handle_upload)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/documents/{filename}", delete(handle_remove))
        .route("/chat", get(handle_history).post(handle_chat))
        .route("/search", post(handle_search))
        .route("/study", post(handle_study))
        .route("/study/download", post(handle_download))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<StudyError> for AppError {
    fn from(err: StudyError) -> Self {
        let (status, code) = match &err {
            StudyError::EmptyTopic | StudyError::EmptyMessage => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            StudyError::Upload { .. } => (StatusCode::BAD_REQUEST, "upload_error"),
            StudyError::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_error"),
            StudyError::Classification { .. } | StudyError::Completion(_) => {
                (StatusCode::BAD_GATEWAY, "completion_error")
            }
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Sessions ============

struct SessionSlot {
    session: Arc<Mutex<Session>>,
    last_seen: Instant,
}

/// Live sessions by id, bounded in count and idle time.
struct SessionStore {
    slots: Mutex<HashMap<String, SessionSlot>>,
    max_sessions: usize,
    ttl: Duration,
}

impl SessionStore {
    fn new(config: &Config) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_sessions: config.server.max_sessions.max(1),
            ttl: Duration::from_secs(config.server.session_ttl_secs),
        }
    }

    async fn remove(&self, id: &str) -> bool {
        self.slots.lock().await.remove(id).is_some()
    }

    /// Drop idle sessions, then the least recently used ones until there
    /// is room for one more.
    fn make_room(&self, slots: &mut HashMap<String, SessionSlot>, now: Instant) {
        let before = slots.len();
        slots.retain(|_, slot| now.duration_since(slot.last_seen) <= self.ttl);

        while slots.len() >= self.max_sessions {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_seen)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    slots.remove(&id);
                }
                None => break,
            }
        }

        let evicted = before - slots.len();
        if evicted > 0 {
            tracing::debug!(evicted, live = slots.len(), "sessions evicted");
        }
    }
}

/// Find the caller's session, creating one if the header is missing or stale.
async fn session_for(
    state: &AppState,
    headers: &HeaderMap,
) -> (String, Arc<Mutex<Session>>) {
    let now = Instant::now();
    let mut slots = state.sessions.slots.lock().await;

    if let Some(id) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        if let Some(slot) = slots.get_mut(id) {
            if now.duration_since(slot.last_seen) <= state.sessions.ttl {
                slot.last_seen = now;
                return (id.to_string(), slot.session.clone());
            }
        }
    }

    state.sessions.make_room(&mut slots, now);

    let id = uuid::Uuid::new_v4().to_string();
    let session = match &state.baseline {
        Some(baseline) => Session::with_baseline(
            state.config.clone(),
            state.embedder.clone(),
            state.completer.clone(),
            baseline,
        ),
        None => Session::new(
            state.config.clone(),
            state.embedder.clone(),
            state.completer.clone(),
        ),
    };
    tracing::info!(session = %id, live = slots.len() + 1, "session created");

    let session = Arc::new(Mutex::new(session));
    slots.insert(
        id.clone(),
        SessionSlot {
            session: session.clone(),
            last_seen: now,
        },
    );
    (id, session)
}

type SessionHeader = [(&'static str, String); 1];

fn session_header(id: String) -> SessionHeader {
    [(SESSION_HEADER, id)]
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_end_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| bad_request("missing x-session-id header"))?;
    if state.sessions.remove(id).await {
        tracing::info!(session = %id, "session ended");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no session '{}'", id)))
    }
}

async fn handle_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (SessionHeader, Json<SessionStatus>) {
    let (id, session) = session_for(&state, &headers).await;
    let status = session.lock().await.status();
    (session_header(id), Json(status))
}

#[derive(Serialize)]
struct UploadResponse {
    report: UploadReport,
    status: SessionStatus,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(SessionHeader, Json<UploadResponse>), AppError> {
    let mut uploads = Vec::new();
    let mut rejected = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Multipart error: {e}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if !is_pdf_filename(&filename) {
            rejected.push(SkippedUpload {
                filename,
                reason: "only PDF files are accepted".to_string(),
            });
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("Failed to read {filename}: {e}")))?;
        uploads.push(Upload::new(filename, bytes.to_vec()));
    }

    if uploads.is_empty() && rejected.is_empty() {
        return Err(bad_request("No file provided"));
    }

    let (id, session) = session_for(&state, &headers).await;
    let mut session = session.lock().await;
    let mut report = session.add_documents(uploads).await;
    report.skipped.extend(rejected);
    let status = session.status();

    Ok((session_header(id), Json(UploadResponse { report, status })))
}

async fn handle_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<(SessionHeader, Json<SessionStatus>), AppError> {
    let (id, session) = session_for(&state, &headers).await;
    let mut session = session.lock().await;
    match session.remove_document(&filename).await? {
        Some(_) => Ok((session_header(id), Json(session.status()))),
        None => Err(not_found(format!("no uploaded document named '{}'", filename))),
    }
}

#[derive(Serialize)]
struct HistoryResponse {
    turns: Vec<Turn>,
}

async fn handle_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (SessionHeader, Json<HistoryResponse>) {
    let (id, session) = session_for(&state, &headers).await;
    let turns = session.lock().await.conversation().turns().to_vec();
    (session_header(id), Json(HistoryResponse { turns }))
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct DeltaEvent<'a> {
    text: &'a str,
}

async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<
    (
        SessionHeader,
        Sse<impl Stream<Item = Result<Event, Infallible>>>,
    ),
    AppError,
> {
    if req.message.trim().is_empty() {
        return Err(StudyError::EmptyMessage.into());
    }

    let (id, session) = session_for(&state, &headers).await;
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let cancel = CancellationToken::new();
    let finished = CancellationToken::new();

    // Cancel the response when the client goes away.
    {
        let tx = tx.clone();
        let cancel = cancel.clone();
        let finished = finished.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => cancel.cancel(),
                _ = finished.cancelled() => {}
            }
        });
    }

    let session_id = id.clone();
    tokio::spawn(async move {
        let mut session = session.lock_owned().await;
        let delta_tx = tx.clone();
        let result = send_message(
            &mut session,
            &req.message,
            |text| {
                if let Ok(event) = Event::default()
                    .event("delta")
                    .json_data(DeltaEvent { text })
                {
                    let _ = delta_tx.send(event);
                }
            },
            &cancel,
        )
        .await;
        finished.cancel();

        let event = match result {
            Ok(outcome) => done_event(&outcome),
            Err(e) => Event::default().event("error").json_data(ErrorDetail {
                code: "bad_request".to_string(),
                message: e.to_string(),
            }),
        };
        match event {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => tracing::warn!(session = %session_id, error = %e, "failed to encode chat event"),
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok((
        session_header(id),
        Sse::new(stream).keep_alive(
            KeepAlive::new().interval(Duration::from_secs(state.config.server.keep_alive_secs)),
        ),
    ))
}

fn done_event(outcome: &ChatOutcome) -> Result<Event, axum::Error> {
    Event::default().event("done").json_data(outcome)
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<RetrievedChunk>,
}

async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> Result<(SessionHeader, Json<SearchResponse>), AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let (id, session) = session_for(&state, &headers).await;
    let session = session.lock().await;
    let k = req.k.unwrap_or(state.config.retrieval.top_k);
    let results = session.retrieve(&req.query, k).await?;
    Ok((session_header(id), Json(SearchResponse { results })))
}

#[derive(Deserialize)]
struct StudyRequest {
    topic: String,
    #[serde(default)]
    format: Option<Format>,
}

#[derive(Serialize)]
struct DownloadInfo {
    filename: String,
    format: Format,
}

#[derive(Serialize)]
struct StudyResponse {
    materials: StudyMaterials,
    downloads: Vec<DownloadInfo>,
}

async fn handle_study(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StudyRequest>,
) -> Result<(SessionHeader, Json<StudyResponse>), AppError> {
    if req.topic.trim().is_empty() {
        return Err(StudyError::EmptyTopic.into());
    }
    let (id, session) = session_for(&state, &headers).await;
    let materials = generate_for_session(&*session.lock().await, &req.topic).await?;

    let formats = &state.config.study.formats;
    let downloads = render_all(&materials, formats)
        .map_err(|e| internal(e.to_string()))?
        .into_iter()
        .zip(formats.iter())
        .map(|(d, format)| DownloadInfo {
            filename: d.filename,
            format: *format,
        })
        .collect();

    Ok((
        session_header(id),
        Json(StudyResponse {
            materials,
            downloads,
        }),
    ))
}

async fn handle_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StudyRequest>,
) -> Result<Response, AppError> {
    if req.topic.trim().is_empty() {
        return Err(StudyError::EmptyTopic.into());
    }
    let format = req.format.unwrap_or(Format::Markdown);
    let (id, session) = session_for(&state, &headers).await;
    let materials = generate_for_session(&*session.lock().await, &req.topic).await?;
    let download = render(&materials, format).map_err(|e| internal(e.to_string()))?;

    let disposition = format!("attachment; filename=\"{}\"", download.filename);
    Ok((
        [
            ("content-type", download.content_type.to_string()),
            ("content-disposition", disposition),
            (SESSION_HEADER, id),
        ],
        download.body,
    )
        .into_response())
}
