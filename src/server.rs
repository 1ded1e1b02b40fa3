//! Headwater HTTP server.
//!
//! One axum router fronts every service. Handlers deserialize the wire
//! types from `headwater-api`, call the matching service, and translate
//! domain errors into the JSON error envelope.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/ping` | Liveness |
//! | `GET`  | `/status` | Backend health, models, uptime |
//! | `GET`  | `/routes` | This table as JSON |
//! | `POST` | `/conduit/generate` | Single generation |
//! | `POST` | `/conduit/batch` | Batch generation |
//! | `POST` | `/conduit/sync`, `/conduit/async` | Aliases of `generate` and `batch` |
//! | `POST` | `/conduit/tokenize` | Token count |
//! | `POST` | `/conduit/embeddings` | Embed a document batch |
//! | `GET`  | `/conduit/embeddings/models` | Configured embedding models |
//! | `POST` | `/conduit/embeddings/quick` | Embed one query string |
//! | `GET`  | `/conduit/embeddings/collections` | List collections |
//! | `POST` | `/conduit/embeddings/collections` | Create a collection |
//! | `DELETE` | `/conduit/embeddings/collections` | Delete a collection |
//! | `POST` | `/conduit/embeddings/collections/get` | Describe a collection |
//! | `POST` | `/conduit/embeddings/collections/add` | Upsert documents |
//! | `POST` | `/conduit/embeddings/collections/query` | Similarity search |
//! | `POST` | `/siphon/process` | Ingest a file or URL |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "template required when using input variables" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `disabled`, `embeddings_disabled` | 400 |
//! | `not_found` | 404 |
//! | `conflict` | 409 |
//! | `too_large` | 413 |
//! | `validation_error` | 422 |
//! | `internal` | 500 |
//! | `upstream_error` | 502 |
//! | `unavailable` | 503 |
//! | `timeout` | 504 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use headwater_api::conduit::{
    BatchRequest, BatchResponse, GenerationRequest, GenerationResponse, TokenizationRequest,
    TokenizationResponse,
};
use headwater_api::embeddings::{
    AddDocumentsRequest, AddDocumentsResponse, CollectionRecord, CreateCollectionRequest,
    CreateCollectionResponse, DeleteCollectionRequest, DeleteCollectionResponse,
    EmbeddingsRequest, EmbeddingsResponse, GetCollectionRequest, ListCollectionsResponse,
    QueryCollectionRequest, QueryCollectionResponse, QuickEmbeddingRequest,
    QuickEmbeddingResponse,
};
use headwater_api::error::{ErrorBody, GenerationError, StoreError};
use headwater_api::siphon::{SiphonRequest, SiphonResponse};
use headwater_api::status::{PingResponse, RouteInfo, StatusResponse};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, instrument};

use crate::batch::{BatchFacade, BatchRunError};
use crate::collections::{create_store, CollectionError, CollectionService};
use crate::config::Config;
use crate::embedding::{EmbeddingError, EmbeddingService};
use crate::executor::{BatchError, BatchExecutor, ExecutorConfig};
use crate::generation::{create_dispatch, GenerationDispatch};
use crate::siphon::{SiphonError, SiphonService};
use crate::status::StatusService;
use crate::tokenize::{create_tokenizer, Tokenize};

/// Every route the server exposes, as reported by `GET /routes`.
pub const ROUTES: &[(&str, &str)] = &[
    ("GET", "/ping"),
    ("GET", "/status"),
    ("GET", "/routes"),
    ("POST", "/conduit/generate"),
    ("POST", "/conduit/batch"),
    ("POST", "/conduit/sync"),
    ("POST", "/conduit/async"),
    ("POST", "/conduit/tokenize"),
    ("POST", "/conduit/embeddings"),
    ("GET", "/conduit/embeddings/models"),
    ("POST", "/conduit/embeddings/quick"),
    ("GET", "/conduit/embeddings/collections"),
    ("POST", "/conduit/embeddings/collections"),
    ("DELETE", "/conduit/embeddings/collections"),
    ("POST", "/conduit/embeddings/collections/get"),
    ("POST", "/conduit/embeddings/collections/add"),
    ("POST", "/conduit/embeddings/collections/query"),
    ("POST", "/siphon/process"),
];

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub dispatch: GenerationDispatch,
    pub batch: BatchFacade,
    pub tokenizer: Arc<dyn Tokenize>,
    pub embeddings: EmbeddingService,
    pub collections: CollectionService,
    pub siphon: Arc<SiphonService>,
    pub status: Arc<StatusService>,
}

impl AppState {
    /// Build every service from configuration.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let dispatch = create_dispatch(&config.conduit).context("Failed to build generation backend")?;
        let embeddings =
            EmbeddingService::from_config(&config.embeddings).context("Failed to build embedder")?;
        let store = create_store(&config.collections)
            .await
            .context("Failed to open collection store")?;

        Ok(Self {
            batch: BatchFacade::new(BatchExecutor::new(
                dispatch.clone(),
                ExecutorConfig::from(&config.conduit),
            )),
            tokenizer: create_tokenizer(&config.conduit)?,
            collections: CollectionService::new(store, embeddings.clone()),
            embeddings,
            siphon: Arc::new(SiphonService::new(config.siphon.clone(), dispatch.clone())?),
            status: Arc::new(StatusService::new(
                dispatch.clone(),
                config.conduit.status_model.clone(),
            )),
            dispatch,
        })
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    serve(listener, state).await
}

/// Serve `state` on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, backend = state.dispatch.name(), "headwater listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    // Uploads arrive base64-encoded inside JSON.
    let body_limit = state.siphon.config().max_bytes.saturating_mul(4) / 3 + 64 * 1024;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ping", get(handle_ping))
        .route("/status", get(handle_status))
        .route("/routes", get(handle_routes))
        .route("/conduit/generate", post(handle_generate))
        .route("/conduit/batch", post(handle_batch))
        .route("/conduit/sync", post(handle_generate))
        .route("/conduit/async", post(handle_batch))
        .route("/conduit/tokenize", post(handle_tokenize))
        .route("/conduit/embeddings", post(handle_embeddings))
        .route("/conduit/embeddings/models", get(handle_embedding_models))
        .route("/conduit/embeddings/quick", post(handle_quick_embedding))
        .route(
            "/conduit/embeddings/collections",
            get(handle_list_collections)
                .post(handle_create_collection)
                .delete(handle_delete_collection),
        )
        .route("/conduit/embeddings/collections/get", post(handle_get_collection))
        .route("/conduit/embeddings/collections/add", post(handle_add_documents))
        .route("/conduit/embeddings/collections/query", post(handle_query_collection))
        .route("/siphon/process", post(handle_siphon))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

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

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed");
        }
        (self.status, Json(ErrorBody::new(self.code, self.message))).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        let code = if status == StatusCode::UNPROCESSABLE_ENTITY {
            "validation_error"
        } else {
            "bad_request"
        };
        Self::new(status, code, rejection.body_text())
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        let (status, code) = match &err {
            GenerationError::Upstream { .. } | GenerationError::InvalidOutput(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            GenerationError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            GenerationError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            GenerationError::Disabled => (StatusCode::BAD_REQUEST, "disabled"),
            GenerationError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<BatchRunError> for AppError {
    fn from(err: BatchRunError) -> Self {
        match err {
            BatchRunError::Shape(e) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.to_string())
            }
            BatchRunError::Execution(e @ BatchError::Timeout(_)) => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "timeout", e.to_string())
            }
            BatchRunError::Execution(e) => Self::internal(e.to_string()),
        }
    }
}

impl From<EmbeddingError> for AppError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Disabled => {
                Self::new(StatusCode::BAD_REQUEST, "embeddings_disabled", err.to_string())
            }
            EmbeddingError::UnknownModel(_) | EmbeddingError::NoModel => {
                Self::bad_request(err.to_string())
            }
            EmbeddingError::Provider(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "upstream_error", err.to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CollectionNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            StoreError::AlreadyExists(_) => {
                Self::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            StoreError::DimensionMismatch { .. } | StoreError::InvalidBatch(_) => {
                Self::bad_request(err.to_string())
            }
            StoreError::Backend(e) => Self::internal(format!("{:#}", e)),
        }
    }
}

impl From<CollectionError> for AppError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::Store(e) => e.into(),
            CollectionError::Embedding(e) => e.into(),
        }
    }
}

impl From<SiphonError> for AppError {
    fn from(err: SiphonError) -> Self {
        match err {
            SiphonError::Unsupported(_) | SiphonError::InvalidRequest(_) | SiphonError::Extract(_) => {
                Self::bad_request(err.to_string())
            }
            SiphonError::Fetch(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "upstream_error", err.to_string())
            }
            SiphonError::TooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, "too_large", err.to_string())
            }
            SiphonError::Summary(e) => e.into(),
            SiphonError::Internal(message) => Self::internal(message),
        }
    }
}

type JsonResult<T> = Result<Json<T>, AppError>;

// ============ Server-level ============

async fn handle_ping() -> Json<PingResponse> {
    Json(PingResponse::default())
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.status.check().await)
}

async fn handle_routes() -> Json<Vec<RouteInfo>> {
    Json(
        ROUTES
            .iter()
            .map(|(method, path)| RouteInfo::new(method, path))
            .collect(),
    )
}

// ============ Conduit ============

#[instrument(skip_all, fields(model = tracing::field::Empty))]
async fn handle_generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> JsonResult<GenerationResponse> {
    let Json(request) = payload?;
    tracing::Span::current().record("model", request.params.model.as_str());
    if request.messages.is_empty() {
        return Err(AppError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_error",
            "messages must not be empty",
        ));
    }
    Ok(Json(state.dispatch.generate(request).await?))
}

/// `POST /conduit/batch`. On success `results.len()` equals the declared
/// batch size; shape errors return 422 before any generation call.
async fn handle_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> JsonResult<BatchResponse> {
    let Json(request) = payload?;
    Ok(Json(state.batch.run(request).await?))
}

async fn handle_tokenize(
    State(state): State<AppState>,
    payload: Result<Json<TokenizationRequest>, JsonRejection>,
) -> JsonResult<TokenizationResponse> {
    let Json(request) = payload?;
    let token_count = state
        .tokenizer
        .count_tokens(&request.model, &request.text)
        .await?;
    Ok(Json(TokenizationResponse {
        model: request.model,
        input_text: request.text,
        token_count,
    }))
}

// ============ Embeddings ============

async fn handle_embeddings(
    State(state): State<AppState>,
    payload: Result<Json<EmbeddingsRequest>, JsonRejection>,
) -> JsonResult<EmbeddingsResponse> {
    let Json(request) = payload?;
    request.batch.validate()?;
    let embeddings = state
        .embeddings
        .embed_documents(request.model.as_deref(), &request.batch.documents)
        .await?;
    Ok(Json(EmbeddingsResponse { embeddings }))
}

async fn handle_embedding_models(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.embeddings.models().to_vec())
}

async fn handle_quick_embedding(
    State(state): State<AppState>,
    payload: Result<Json<QuickEmbeddingRequest>, JsonRejection>,
) -> JsonResult<QuickEmbeddingResponse> {
    let Json(request) = payload?;
    let embedding = state
        .embeddings
        .embed_query(request.model.as_deref(), &request.query)
        .await?;
    Ok(Json(QuickEmbeddingResponse { embedding }))
}

async fn handle_list_collections(State(state): State<AppState>) -> JsonResult<ListCollectionsResponse> {
    Ok(Json(ListCollectionsResponse {
        collections: state.collections.list().await?,
    }))
}

async fn handle_get_collection(
    State(state): State<AppState>,
    payload: Result<Json<GetCollectionRequest>, JsonRejection>,
) -> JsonResult<CollectionRecord> {
    let Json(request) = payload?;
    Ok(Json(state.collections.get(&request.collection_name).await?))
}

async fn handle_create_collection(
    State(state): State<AppState>,
    payload: Result<Json<CreateCollectionRequest>, JsonRejection>,
) -> JsonResult<CreateCollectionResponse> {
    let Json(request) = payload?;
    Ok(Json(state.collections.create(request).await?))
}

async fn handle_delete_collection(
    State(state): State<AppState>,
    payload: Result<Json<DeleteCollectionRequest>, JsonRejection>,
) -> JsonResult<DeleteCollectionResponse> {
    let Json(request) = payload?;
    Ok(Json(state.collections.delete(&request.collection_name).await?))
}

async fn handle_add_documents(
    State(state): State<AppState>,
    payload: Result<Json<AddDocumentsRequest>, JsonRejection>,
) -> JsonResult<AddDocumentsResponse> {
    let Json(request) = payload?;
    Ok(Json(state.collections.add(request).await?))
}

async fn handle_query_collection(
    State(state): State<AppState>,
    payload: Result<Json<QueryCollectionRequest>, JsonRejection>,
) -> JsonResult<QueryCollectionResponse> {
    let Json(request) = payload?;
    Ok(Json(state.collections.query(request).await?))
}

// ============ Siphon ============

async fn handle_siphon(
    State(state): State<AppState>,
    payload: Result<Json<SiphonRequest>, JsonRejection>,
) -> JsonResult<SiphonResponse> {
    let Json(request) = payload?;
    Ok(Json(state.siphon.process(request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use headwater_api::error::ShapeError;
    use std::time::Duration;

    fn status_of(err: impl Into<AppError>) -> (StatusCode, &'static str) {
        let err = err.into();
        (err.status, err.code)
    }

    #[test]
    fn generation_errors_map_to_gateway_statuses() {
        assert_eq!(
            status_of(GenerationError::Upstream {
                status: 500,
                message: "boom".into()
            }),
            (StatusCode::BAD_GATEWAY, "upstream_error")
        );
        assert_eq!(
            status_of(GenerationError::Unavailable("refused".into())),
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        );
        assert_eq!(
            status_of(GenerationError::Timeout(Duration::from_secs(1))),
            (StatusCode::GATEWAY_TIMEOUT, "timeout")
        );
        assert_eq!(
            status_of(GenerationError::Disabled),
            (StatusCode::BAD_REQUEST, "disabled")
        );
    }

    #[test]
    fn batch_errors() {
        assert_eq!(
            status_of(BatchRunError::Shape(ShapeError::MissingTemplate)),
            (StatusCode::UNPROCESSABLE_ENTITY, "validation_error")
        );
        assert_eq!(
            status_of(BatchRunError::Execution(BatchError::Timeout(Duration::from_secs(2)))),
            (StatusCode::GATEWAY_TIMEOUT, "timeout")
        );
        assert_eq!(
            status_of(BatchRunError::Execution(BatchError::NestedRuntime)),
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        );
    }

    #[test]
    fn store_and_siphon_errors() {
        assert_eq!(
            status_of(StoreError::CollectionNotFound("c".into())),
            (StatusCode::NOT_FOUND, "not_found")
        );
        assert_eq!(
            status_of(StoreError::AlreadyExists("c".into())),
            (StatusCode::CONFLICT, "conflict")
        );
        assert_eq!(
            status_of(SiphonError::TooLarge { size: 10, limit: 5 }),
            (StatusCode::PAYLOAD_TOO_LARGE, "too_large")
        );
        assert_eq!(
            status_of(SiphonError::Fetch("dns".into())),
            (StatusCode::BAD_GATEWAY, "upstream_error")
        );
        assert_eq!(
            status_of(EmbeddingError::Disabled),
            (StatusCode::BAD_REQUEST, "embeddings_disabled")
        );
    }

    #[test]
    fn route_table_is_unique() {
        let mut seen = std::collections::HashSet::new();
        for route in ROUTES {
            assert!(seen.insert(route), "duplicate route {:?}", route);
        }
    }
}
