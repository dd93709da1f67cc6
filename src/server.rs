//! JSON HTTP API over the knowledge base.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | API name, version and endpoint map |
//! | `GET`  | `/health` | Liveness plus service readiness |
//! | `GET`  | `/api/status` | Knowledge base, embedding and LLM status |
//! | `POST` | `/api/documents/upload` | Multipart upload of a `.pdf`, `.txt` or `.md` file |
//! | `POST` | `/api/documents/text` | Add raw text |
//! | `POST` | `/api/query` | Ask a question |
//! | `GET`  | `/api/documents` | List stored chunks |
//! | `DELETE` | `/api/documents` | Remove every document |
//! | `GET`  | `/api/config` | Current chunking and retrieval settings |
//! | `PUT`  | `/api/config` | Update chunking and retrieval settings |
//!
//! # Error Contract
//!
//! Every error response has the shape
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "No question provided" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `method_not_allowed` (405), `index_stale` (409), `payload_too_large` (413),
//! `unsupported_media_type` (415), `internal` (500), `upstream_error` (502),
//! `llm_unavailable` (503).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::chunk::ChunkingParams;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::llm::{AnswerGenerator, GroqClient, LlmError};
use crate::loader::{extract_text, sanitize_file_name, DocumentKind, LoadError};
use crate::store::{KnowledgeBase, StoreError, StorePaths};

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

const DEFAULT_SOURCE_NAME: &str = "manual_input";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub kb: Arc<RwLock<KnowledgeBase>>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn AnswerGenerator>,
    /// Default `top_k` for queries; adjustable through `PUT /api/config`.
    pub top_k: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        config: Config,
        kb: KnowledgeBase,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        let top_k = config.retrieval.top_k;
        Self {
            config: Arc::new(config),
            kb: Arc::new(RwLock::new(kb)),
            embedder,
            generator,
            top_k: Arc::new(AtomicUsize::new(top_k)),
        }
    }
}

/// Starts the HTTP server with the providers named in the configuration.
///
/// A missing LLM API key is logged, not fatal: queries against a
/// non-empty knowledge base then answer `503 llm_unavailable`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let generator = GroqClient::from_config(&config.llm)?;
    if !generator.is_ready() {
        warn!(
            env = %config.llm.api_key_env,
            "LLM API key not set; queries will fail until it is configured"
        );
    }
    run_server_with(config, embedder, Arc::new(generator)).await
}

/// Starts the HTTP server with caller-supplied providers.
///
/// Binds to `[server].bind` (port overridable by `$PORT`) and runs until
/// Ctrl-C.
pub async fn run_server_with(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn AnswerGenerator>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind_addr();
    let kb = KnowledgeBase::open(
        StorePaths::from_config(&config.storage),
        config.chunking.params(),
    )?;
    let state = AppState::new(config.clone(), kb, embedder, generator);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "RAG server listening");
    println!("RAG server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// The full route table with CORS, tracing and the body limit applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/status", get(handle_status))
        .route("/api/documents/upload", post(handle_upload_document))
        .route("/api/documents/text", post(handle_upload_text))
        .route("/api/query", post(handle_query))
        .route(
            "/api/documents",
            get(handle_list_documents).delete(handle_clear_documents),
        )
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .fallback(handle_not_found)
        .method_not_allowed_fallback(handle_method_not_allowed)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
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
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Maps a status produced by an extractor rejection to an error code.
fn rejection(status: StatusCode, message: String) -> AppError {
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => {
            AppError::new(status, "payload_too_large", message)
        }
        StatusCode::UNSUPPORTED_MEDIA_TYPE => {
            AppError::new(status, "unsupported_media_type", message)
        }
        s if s.is_server_error() => internal(message),
        _ => bad_request(message),
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        rejection(err.status(), err.body_text())
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        rejection(err.status(), err.body_text())
    }
}

impl From<LoadError> for AppError {
    fn from(err: LoadError) -> Self {
        bad_request(err.to_string())
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingApiKey(_) => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "llm_unavailable",
                err.to_string(),
            ),
            _ => AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmptyDocument
            | StoreError::EmptyQuestion
            | StoreError::InvalidTopK
            | StoreError::Chunking(_) => bad_request(err.to_string()),
            StoreError::ModelChanged { .. } => {
                AppError::new(StatusCode::CONFLICT, "index_stale", err.to_string())
            }
            StoreError::FileName(e) => e.into(),
            StoreError::Llm(e) => e.into(),
            StoreError::Embedding(_) | StoreError::Index(_) | StoreError::Persist(_) => {
                internal(err.to_string())
            }
        }
    }
}

// ============ Fallbacks ============

async fn handle_not_found() -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", "Endpoint not found")
}

async fn handle_method_not_allowed() -> AppError {
    AppError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        "method_not_allowed",
        "Method not allowed",
    )
}

// ============ GET / ============

async fn handle_root() -> Json<Value> {
    Json(json!({
        "message": "Frameworkless RAG API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "status": "/api/status",
            "upload_document": "/api/documents/upload",
            "upload_text": "/api/documents/text",
            "query": "/api/query",
            "documents": "/api/documents",
            "config": "/api/config",
        },
        "documentation": {
            "health": "GET - Check system health",
            "status": "GET - Get system status and information",
            "upload_document": "POST - Upload PDF, TXT or MD files",
            "upload_text": "POST - Upload text content directly",
            "query": "POST - Query the RAG system",
            "documents": "GET - Get document information, DELETE - Clear all documents",
            "config": "GET - Get configuration, PUT - Update configuration",
        },
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    services: HealthServices,
}

#[derive(Serialize)]
struct HealthServices {
    rag_service: bool,
    llm_service: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        services: HealthServices {
            rag_service: true,
            llm_service: state.generator.is_ready(),
        },
    })
}

// ============ GET /api/status ============

async fn handle_status(State(state): State<AppState>) -> Json<Value> {
    let kb_status = state.kb.read().await.status();
    Json(json!({
        "documents_count": kb_status.documents_count,
        "files_count": kb_status.files_count,
        "index_status": kb_status.index_status,
        "index_size": kb_status.index_size,
        "dimension": kb_status.dimension,
        "chunk_size": kb_status.chunk_size,
        "chunk_overlap": kb_status.chunk_overlap,
        "top_k": state.top_k.load(Ordering::Relaxed),
        "embedding_provider": state.config.embedding.provider,
        "embedding_model": state.embedder.model_name(),
        "embedding_dims": state.embedder.dims(),
        "llm": state.generator.info(),
    }))
}

// ============ POST /api/documents/upload ============

/// Handler for `POST /api/documents/upload`.
///
/// Multipart fields: `file` (required), `chunk_size` and `chunk_overlap`
/// (optional). Supplied chunking values become the new defaults once the
/// document is stored. Files without a known extension are typed by the
/// part's `Content-Type`.
async fn handle_upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut upload: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut chunk_size: Option<usize> = None;
    let mut chunk_overlap: Option<usize> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                upload = Some((name, content_type, bytes.to_vec()));
            }
            "chunk_size" => chunk_size = Some(parse_number("chunk_size", &field.text().await?)?),
            "chunk_overlap" => {
                chunk_overlap = Some(parse_number("chunk_overlap", &field.text().await?)?)
            }
            _ => {}
        }
    }

    let (raw_name, content_type, bytes) =
        upload.ok_or_else(|| bad_request("No file provided"))?;
    if raw_name.trim().is_empty() {
        return Err(bad_request("No file selected"));
    }
    let file_name = sanitize_file_name(&raw_name)?;
    let kind = DocumentKind::from_file_name(&file_name)
        .or_else(|| content_type.as_deref().and_then(DocumentKind::from_content_type))
        .ok_or_else(|| bad_request("Unsupported file type. Use PDF or TXT files."))?;

    let text = tokio::task::spawn_blocking(move || extract_text(&bytes, kind))
        .await
        .map_err(|e| internal(format!("text extraction task failed: {}", e)))??;

    let mut kb = state.kb.write().await;
    let params = merge_params(kb.params(), chunk_size, chunk_overlap);
    let outcome = kb
        .add_document_with(state.embedder.as_ref(), &file_name, &text, params)
        .await?;

    Ok(Json(json!({
        "message": "Document processed successfully",
        "filename": outcome.file_name,
        "document_id": outcome.document_id,
        "documents_added": outcome.chunks_added,
        "replaced": outcome.replaced_chunks,
        "chunk_size": params.chunk_size,
        "chunk_overlap": params.chunk_overlap,
    })))
}

fn parse_number(field: &str, raw: &str) -> Result<usize, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| bad_request(format!("{} must be a non-negative integer", field)))
}

fn merge_params(
    current: ChunkingParams,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> ChunkingParams {
    ChunkingParams {
        chunk_size: chunk_size.unwrap_or(current.chunk_size),
        chunk_overlap: chunk_overlap.unwrap_or(current.chunk_overlap),
    }
}

// ============ POST /api/documents/text ============

#[derive(Deserialize)]
struct TextUploadRequest {
    text: Option<String>,
    source_name: Option<String>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
}

async fn handle_upload_text(
    State(state): State<AppState>,
    payload: Result<Json<TextUploadRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload?;
    let text = req.text.ok_or_else(|| bad_request("No text provided"))?;
    let source_name = req
        .source_name
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string());

    let mut kb = state.kb.write().await;
    let params = merge_params(kb.params(), req.chunk_size, req.chunk_overlap);
    let outcome = kb
        .add_document_with(state.embedder.as_ref(), &source_name, &text, params)
        .await?;

    Ok(Json(json!({
        "message": "Text processed successfully",
        "source_name": outcome.file_name,
        "document_id": outcome.document_id,
        "documents_added": outcome.chunks_added,
        "replaced": outcome.replaced_chunks,
        "chunk_size": params.chunk_size,
        "chunk_overlap": params.chunk_overlap,
    })))
}

// ============ POST /api/query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: Option<String>,
    top_k: Option<usize>,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload?;
    let question = req
        .question
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("No question provided"))?;
    let top_k = req
        .top_k
        .unwrap_or_else(|| state.top_k.load(Ordering::Relaxed));

    let kb = state.kb.read().await;
    let result = kb
        .query(
            state.embedder.as_ref(),
            state.generator.as_ref(),
            &question,
            top_k,
        )
        .await?;

    Ok(Json(json!({
        "question": question,
        "answer": result.answer,
        "sources": result.sources,
        "confidence": result.confidence,
        "top_k": top_k,
    })))
}

// ============ /api/documents ============

async fn handle_list_documents(State(state): State<AppState>) -> Json<Value> {
    let info = state.kb.read().await.documents_info();
    Json(json!(info))
}

async fn handle_clear_documents(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let removed = state.kb.write().await.clear()?;
    Ok(Json(json!({
        "message": "All documents cleared successfully",
        "removed": removed,
    })))
}

// ============ /api/config ============

async fn current_config(state: &AppState) -> Value {
    let params = state.kb.read().await.params();
    json!({
        "chunk_size": params.chunk_size,
        "chunk_overlap": params.chunk_overlap,
        "top_k": state.top_k.load(Ordering::Relaxed),
        "embedding_model": state.embedder.model_name(),
        "llm_model": state.generator.info().model_name,
    })
}

async fn handle_get_config(State(state): State<AppState>) -> Json<Value> {
    Json(current_config(&state).await)
}

#[derive(Deserialize)]
struct ConfigUpdate {
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    top_k: Option<usize>,
}

/// Handler for `PUT /api/config`. Either every supplied value is applied
/// or none is.
async fn handle_put_config(
    State(state): State<AppState>,
    payload: Result<Json<ConfigUpdate>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(update) = payload?;
    if update.chunk_size.is_none() && update.chunk_overlap.is_none() && update.top_k.is_none() {
        return Err(bad_request("No configuration data provided"));
    }
    if update.top_k == Some(0) {
        return Err(bad_request("top_k must be at least 1"));
    }

    {
        let mut kb = state.kb.write().await;
        let params = merge_params(kb.params(), update.chunk_size, update.chunk_overlap);
        kb.set_chunking(params)?;
    }
    if let Some(top_k) = update.top_k {
        state.top_k.store(top_k, Ordering::Relaxed);
    }

    Ok(Json(json!({
        "message": "Configuration updated successfully",
        "config": current_config(&state).await,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn status_and_code(err: AppError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        (status, body["error"]["code"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn store_errors_map_by_variant() {
        let (status, code) = status_and_code(StoreError::EmptyQuestion.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "bad_request");

        let missing = StoreError::Llm(LlmError::MissingApiKey("GROQ_API_KEY".into()));
        let (status, code) = status_and_code(missing.into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "llm_unavailable");

        let upstream = StoreError::Llm(LlmError::Api {
            status: 401,
            body: "bad key".into(),
        });
        let (status, code) = status_and_code(upstream.into()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(code, "upstream_error");

        let persist = StoreError::Persist(anyhow::anyhow!("disk full"));
        let (status, code) = status_and_code(persist.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "internal");

        let stale = StoreError::ModelChanged {
            indexed: "'a' (4 dims)".into(),
            current: "'b' (8 dims)".into(),
        };
        let (status, code) = status_and_code(stale.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "index_stale");
    }

    #[tokio::test]
    async fn rejection_statuses_keep_their_codes() {
        let (status, code) =
            status_and_code(rejection(StatusCode::PAYLOAD_TOO_LARGE, "big".into())).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(code, "payload_too_large");

        let (status, code) =
            status_and_code(rejection(StatusCode::UNSUPPORTED_MEDIA_TYPE, "json".into())).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(code, "unsupported_media_type");

        let (_, code) =
            status_and_code(rejection(StatusCode::UNPROCESSABLE_ENTITY, "shape".into())).await;
        assert_eq!(code, "bad_request");
    }

    #[test]
    fn merge_keeps_unset_values() {
        let current = ChunkingParams {
            chunk_size: 100,
            chunk_overlap: 10,
        };
        let merged = merge_params(current, None, Some(20));
        assert_eq!(merged.chunk_size, 100);
        assert_eq!(merged.chunk_overlap, 20);
    }
}
