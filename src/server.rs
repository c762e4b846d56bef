//! HTTP server.
//!
//! Serves the shared persisted session plus per-user ephemeral sessions
//! over a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Shared index status |
//! | `POST` | `/upload` | Base64 files → rebuild the shared index |
//! | `POST` | `/ask` | Ask the shared index |
//! | `GET`  | `/history` | Shared conversation history |
//! | `POST` | `/sessions/{id}/documents` | Index documents into an ephemeral session |
//! | `POST` | `/sessions/{id}/ask` | Ask an ephemeral session |
//! | `GET`  | `/sessions/{id}/history` | Ephemeral session history |
//! | `DELETE` | `/sessions/{id}` | Drop an ephemeral session |
//!
//! Upload bodies are capped at `[server].max_upload_bytes`. Ephemeral
//! sessions idle for `[server].session_ttl_secs` are dropped, and at most
//! `[server].max_sessions` are kept, evicting the least recently used.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_input", "message": "question must not be empty" } }
//! ```
//!
//! Codes come from [`QaError::code`]. Status: 400 for invalid input and
//! unsupported formats, 404 when no index exists, 409 while a rebuild is in
//! flight, 502 when a backend is unavailable, 504 on backend timeout and 500
//! otherwise.
//!
//! Ask endpoints degrade instead of failing: a backend error still yields
//! `200` with an `"Error during QnA: ..."` answer and the error detail
//! attached. Only malformed questions are rejected with `400`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use askdocs_core::models::{ConversationTurn, DocumentMetadata, RawDocument};
use askdocs_core::QaError;

use crate::config::{Config, ServerConfig};
use crate::embedding::create_embedder;
use crate::engine::{QueryEngine, Source};
use crate::generation::create_generator;
use crate::loader::{DocumentSource, UploadedFile};
use crate::session::{BuildSettings, RebuildReport, Session, SessionStatus};

/// Id of the shared persisted session.
pub const SHARED_SESSION: &str = "shared";

const MAX_SESSION_ID_LEN: usize = 128;

/// Upload and session limits, from `[server]`.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    pub max_upload_bytes: usize,
    pub max_sessions: usize,
    pub session_ttl: Duration,
}

impl ServerLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            max_sessions: config.max_sessions,
            session_ttl: Duration::from_secs(config.session_ttl_secs),
        }
    }
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

struct EphemeralEntry {
    session: Arc<Session>,
    last_used: Instant,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    shared: Arc<Session>,
    engine: Arc<QueryEngine>,
    settings: BuildSettings,
    limits: ServerLimits,
    ephemeral: Arc<RwLock<HashMap<String, EphemeralEntry>>>,
}

impl AppState {
    pub fn new(
        shared: Arc<Session>,
        engine: Arc<QueryEngine>,
        settings: BuildSettings,
        limits: ServerLimits,
    ) -> Self {
        Self {
            shared,
            engine,
            settings,
            limits,
            ephemeral: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn find_session(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.ephemeral.write().await;
        let entry = sessions.get_mut(id)?;
        entry.last_used = Instant::now();
        Some(entry.session.clone())
    }

    async fn session_or_create(&self, id: &str) -> Arc<Session> {
        let mut sessions = self.ephemeral.write().await;
        let now = Instant::now();
        if let Some(entry) = sessions.get_mut(id) {
            entry.last_used = now;
            return entry.session.clone();
        }

        evict_expired(&mut sessions, self.limits.session_ttl, now);
        while sessions.len() >= self.limits.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::info!(session = %oldest, "evicted least recently used ephemeral session");
        }

        let session = Arc::new(Session::ephemeral(
            id,
            self.engine.clone(),
            self.settings.clone(),
        ));
        sessions.insert(
            id.to_string(),
            EphemeralEntry {
                session: session.clone(),
                last_used: now,
            },
        );
        tracing::info!(session = %id, live = sessions.len(), "created ephemeral session");
        session
    }

    async fn remove_session(&self, id: &str) -> bool {
        self.ephemeral.write().await.remove(id).is_some()
    }

    /// Drop ephemeral sessions idle for longer than the configured TTL.
    /// Returns how many were dropped.
    pub async fn evict_idle(&self) -> usize {
        let mut sessions = self.ephemeral.write().await;
        evict_expired(&mut sessions, self.limits.session_ttl, Instant::now())
    }
}

fn evict_expired(
    sessions: &mut HashMap<String, EphemeralEntry>,
    ttl: Duration,
    now: Instant,
) -> usize {
    let before = sessions.len();
    sessions.retain(|id, entry| {
        let live = now.saturating_duration_since(entry.last_used) < ttl;
        if !live {
            tracing::info!(session = %id, "dropped idle ephemeral session");
        }
        live
    });
    before - sessions.len()
}

/// Build the router for `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let upload_limit = state.limits.max_upload_bytes;

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/ask", post(handle_ask))
        .route("/history", get(handle_history))
        .route("/sessions/{id}", delete(handle_session_delete))
        .route(
            "/sessions/{id}/documents",
            post(handle_session_documents).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/sessions/{id}/ask", post(handle_session_ask))
        .route("/sessions/{id}/history", get(handle_session_history))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Creates the configured backends, opens the shared index under
/// `[storage].path` and binds to `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    let engine = Arc::new(QueryEngine::new(
        embedder,
        generator,
        config.retrieval.top_k,
    ));
    let settings = BuildSettings::from_config(config);

    let shared = Arc::new(Session::persisted(
        SHARED_SESSION,
        config.storage.path.clone(),
        engine.clone(),
        settings.clone(),
    ));
    shared.open().await?;

    let limits = ServerLimits::from_config(&config.server);
    let state = AppState::new(shared, engine, settings, limits.clone());

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limits.session_ttl.min(Duration::from_secs(60)));
        loop {
            ticker.tick().await;
            sweeper.evict_idle().await;
        }
    });

    let app = router(state);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "askdocs server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl From<&QaError> for ErrorDetail {
    fn from(err: &QaError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

struct AppError {
    status: StatusCode,
    detail: ErrorDetail,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.detail })).into_response()
    }
}

impl From<QaError> for AppError {
    fn from(err: QaError) -> Self {
        Self {
            status: status_for(&err),
            detail: ErrorDetail::from(&err),
        }
    }
}

fn status_for(err: &QaError) -> StatusCode {
    match err {
        QaError::InvalidInput(_) | QaError::UnsupportedFormat { .. } => StatusCode::BAD_REQUEST,
        QaError::IndexNotFound(_) => StatusCode::NOT_FOUND,
        QaError::RebuildInProgress => StatusCode::CONFLICT,
        QaError::EmbeddingUnavailable(_) | QaError::GenerationUnavailable(_) => {
            StatusCode::BAD_GATEWAY
        }
        QaError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        detail: ErrorDetail {
            code: "session_not_found".to_string(),
            message: message.into(),
        },
    }
}

fn validate_session_id(id: &str) -> Result<(), AppError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(QaError::invalid(format!("invalid session id: {:?}", id)).into())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /status ============

async fn handle_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.shared.status().await)
}

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadRequest {
    files: Vec<UploadFile>,
}

#[derive(Deserialize)]
struct UploadFile {
    name: String,
    /// File bytes, standard base64.
    content_base64: String,
    #[serde(default)]
    mime: Option<String>,
}

fn decode_uploads(files: Vec<UploadFile>) -> Result<Vec<UploadedFile>, QaError> {
    if files.is_empty() {
        return Err(QaError::invalid("no files uploaded"));
    }
    files
        .into_iter()
        .map(|f| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(f.content_base64.trim())
                .map_err(|e| QaError::invalid(format!("{}: invalid base64: {}", f.name, e)))?;
            Ok(UploadedFile {
                name: f.name,
                bytes,
                mime: f.mime,
            })
        })
        .collect()
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<RebuildReport>, AppError> {
    let files = decode_uploads(req.files)?;
    let report = state.shared.upload(DocumentSource::Uploads(files)).await?;
    Ok(Json(report))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    sources: Vec<Source>,
    generation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
}

async fn ask_session(session: &Session, question: &str) -> Result<Json<AskResponse>, AppError> {
    match session.ask_detailed(question).await {
        Ok(answer) => Ok(Json(AskResponse {
            answer: answer.text,
            sources: answer.sources,
            generation_id: answer.generation_id,
            error: None,
        })),
        Err(e @ QaError::InvalidInput(_)) => Err(e.into()),
        Err(e) => {
            tracing::warn!(session = %session.id(), error = %e, "degraded answer");
            Ok(Json(AskResponse {
                answer: format!("Error during QnA: {}", e),
                sources: Vec::new(),
                generation_id: None,
                error: Some(ErrorDetail::from(&e)),
            }))
        }
    }
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    ask_session(&state.shared, &req.question).await
}

// ============ GET /history ============

#[derive(Serialize)]
struct HistoryResponse {
    turns: Vec<ConversationTurn>,
}

async fn handle_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        turns: state.shared.history().await,
    })
}

// ============ /sessions/{id}/... ============

#[derive(Deserialize)]
struct DocumentsRequest {
    documents: Vec<DocumentInput>,
}

/// A document already normalized by a source adapter.
#[derive(Deserialize)]
struct DocumentInput {
    #[serde(default)]
    id: Option<String>,
    source_uri: String,
    text: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    source_type: Option<String>,
}

impl From<DocumentInput> for RawDocument {
    fn from(input: DocumentInput) -> Self {
        let metadata = DocumentMetadata {
            source_type: input.source_type.unwrap_or_else(|| "external".to_string()),
            title: input.title,
            path: None,
            author: None,
            timestamp: Utc::now(),
            content_type: "text/plain".to_string(),
        };
        let mut doc = RawDocument::new(input.source_uri, input.text, metadata);
        if let Some(id) = input.id.filter(|id| !id.is_empty()) {
            doc.id = id;
        }
        doc
    }
}

async fn handle_session_documents(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DocumentsRequest>,
) -> Result<Json<RebuildReport>, AppError> {
    validate_session_id(&id)?;
    let docs: Vec<RawDocument> = req.documents.into_iter().map(RawDocument::from).collect();
    let session = state.session_or_create(&id).await;
    let report = session.upload(DocumentSource::Documents(docs)).await?;
    // Long rebuilds count as activity.
    state.find_session(&id).await;
    Ok(Json(report))
}

async fn handle_session_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    validate_session_id(&id)?;
    match state.find_session(&id).await {
        Some(session) => ask_session(&session, &req.question).await,
        // Same answer an empty session would give, without creating one.
        None => ask_session(
            &Session::ephemeral(id, state.engine.clone(), state.settings.clone()),
            &req.question,
        )
        .await,
    }
}

async fn handle_session_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    validate_session_id(&id)?;
    let session = state
        .find_session(&id)
        .await
        .ok_or_else(|| not_found(format!("no session with id: {}", id)))?;
    Ok(Json(HistoryResponse {
        turns: session.history().await,
    }))
}

async fn handle_session_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    validate_session_id(&id)?;
    if state.remove_session(&id).await {
        tracing::info!(session = %id, "deleted ephemeral session");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no session with id: {}", id)))
    }
}
