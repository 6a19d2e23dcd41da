//! JSON HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/search` | Access-filtered retrieval for a subject |
//! | `POST` | `/check` | Point authorization check |
//! | `GET`  | `/accessible` | Documents a subject holds a relation on |
//! | `POST` | `/warrants` | Create or delete a warrant |
//! | `GET`  | `/warrants` | List warrants on a resource type or resource |
//! | `POST` | `/share` | Owner grants viewer on a batch of documents |
//!
//! Subjects are written `type:id` (`"user:alice"`); a bare id means a user.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_authorized", "message": "user:bob is not authorized on document:doc_B" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `invalid_relation`, `invalid_request` | 400 |
//! | `not_authorized` | 403 |
//! | `timeout` | 504 |
//! | `store_unavailable`, `index_unavailable`, `provider_error` | 503 |
//! | `invalid_schema` | 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.
//!
//! # Trust
//!
//! Callers are not authenticated. `/share` trusts the `owner` named in the
//! body and `/warrants` accepts any write, so the owner check only holds
//! against honest callers. Keep `[server].bind` on loopback
//! (`127.0.0.1:7341` by default) or put an authenticating proxy in front.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use gated_context_core::error::GateError;
use gated_context_core::models::{
    Consistency, ResourceRef, Revision, Subject, Warrant, WriteOp,
};
use gated_context_core::retrieval::{RetrievalOutcome, RetrievalRequest, RetrievedChunk};

use crate::app::App;
use crate::config::Config;

/// Open the database and serve on `[server].bind` until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("gctx server listening on http://{}", bind_addr);
    tracing::info!(%bind_addr, "server started");

    axum::serve(listener, router(app)).await?;
    Ok(())
}

/// All routes over a ready [`App`].
pub fn router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/check", post(handle_check))
        .route("/accessible", get(handle_accessible))
        .route("/warrants", post(handle_write_warrant).get(handle_list_warrants))
        .route("/share", post(handle_share))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
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

fn status_for(err: &GateError) -> StatusCode {
    match err {
        GateError::InvalidRelation { .. } | GateError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        GateError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
        GateError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GateError::StoreUnavailable(_)
        | GateError::IndexUnavailable(_)
        | GateError::ProviderError(_) => StatusCode::SERVICE_UNAVAILABLE,
        GateError::InvalidSchema(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::warn!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "invalid_request".to_string(),
        message: message.into(),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

fn parse_subject(raw: &str) -> Result<Subject, AppError> {
    raw.parse::<Subject>()
        .map_err(|e| bad_request(format!("invalid subject '{}': {}", raw, e)))
}

fn consistency(at_revision: Option<u64>) -> Consistency {
    at_revision
        .map(|r| Consistency::AtLeast(Revision(r)))
        .unwrap_or_default()
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

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    subject: Subject,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    /// Read-after-write: the revision returned by an earlier write.
    #[serde(default)]
    at_revision: Option<u64>,
}

#[derive(Serialize)]
struct SearchResponse {
    status: &'static str,
    results: Vec<RetrievedChunk>,
}

async fn handle_search(
    State(app): State<App>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = payload?;
    let top_k = req.top_k.unwrap_or(app.config.retrieval.top_k);
    let request = RetrievalRequest::new(req.subject, req.query, top_k)
        .with_consistency(consistency(req.at_revision));

    let response = match app.service.retrieve(&request).await? {
        RetrievalOutcome::NoAccessibleDocuments => SearchResponse {
            status: "no_accessible_documents",
            results: Vec::new(),
        },
        RetrievalOutcome::Results(results) => SearchResponse {
            status: "ok",
            results,
        },
    };
    Ok(Json(response))
}

// ============ POST /check ============

#[derive(Deserialize)]
struct CheckRequest {
    subject: Subject,
    relation: String,
    #[serde(default)]
    resource_type: Option<String>,
    resource_id: String,
    #[serde(default)]
    at_revision: Option<u64>,
}

#[derive(Serialize)]
struct CheckResponse {
    allowed: bool,
}

async fn handle_check(
    State(app): State<App>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, AppError> {
    let Json(req) = payload?;
    let resource = ResourceRef::new(
        req.resource_type
            .unwrap_or_else(|| app.config.authz.document_type.clone()),
        req.resource_id,
    );
    let allowed = app
        .evaluator()
        .check_with(&req.subject, &req.relation, &resource, consistency(req.at_revision))
        .await?;
    Ok(Json(CheckResponse { allowed }))
}

// ============ GET /accessible ============

#[derive(Deserialize)]
struct AccessibleParams {
    subject: String,
    #[serde(default)]
    relation: Option<String>,
    #[serde(default)]
    at_revision: Option<u64>,
}

#[derive(Serialize)]
struct AccessibleResponse {
    resource_ids: BTreeSet<String>,
}

async fn handle_accessible(
    State(app): State<App>,
    params: Result<Query<AccessibleParams>, QueryRejection>,
) -> Result<Json<AccessibleResponse>, AppError> {
    let Query(params) = params?;
    let subject = parse_subject(&params.subject)?;
    let relation = params
        .relation
        .unwrap_or_else(|| app.config.authz.viewer_relation.clone());
    let resource_ids = app
        .evaluator()
        .list_accessible_with(
            &subject,
            &relation,
            &app.config.authz.document_type,
            consistency(params.at_revision),
        )
        .await?;
    Ok(Json(AccessibleResponse { resource_ids }))
}

// ============ /warrants ============

#[derive(Deserialize)]
struct WriteWarrantRequest {
    op: WriteOp,
    warrant: Warrant,
}

#[derive(Serialize)]
struct RevisionResponse {
    revision: Revision,
}

async fn handle_write_warrant(
    State(app): State<App>,
    payload: Result<Json<WriteWarrantRequest>, JsonRejection>,
) -> Result<Json<RevisionResponse>, AppError> {
    let Json(req) = payload?;
    let revision = app.store().write(&req.warrant, req.op).await?;
    Ok(Json(RevisionResponse { revision }))
}

#[derive(Deserialize)]
struct ListWarrantsParams {
    #[serde(default)]
    resource_type: Option<String>,
    #[serde(default)]
    resource_id: Option<String>,
}

#[derive(Serialize)]
struct ListWarrantsResponse {
    warrants: Vec<Warrant>,
}

async fn handle_list_warrants(
    State(app): State<App>,
    params: Result<Query<ListWarrantsParams>, QueryRejection>,
) -> Result<Json<ListWarrantsResponse>, AppError> {
    let Query(params) = params?;
    let resource_type = params
        .resource_type
        .unwrap_or_else(|| app.config.authz.document_type.clone());
    let warrants = app
        .store()
        .list_warrants(&resource_type, params.resource_id.as_deref())
        .await?;
    Ok(Json(ListWarrantsResponse { warrants }))
}

// ============ POST /share ============

#[derive(Deserialize)]
struct ShareRequest {
    owner: Subject,
    grantee: Subject,
    resource_ids: Vec<String>,
    /// Revision of the ownership write, so a fresh owner is not refused.
    #[serde(default)]
    at_revision: Option<u64>,
}

async fn handle_share(
    State(app): State<App>,
    payload: Result<Json<ShareRequest>, JsonRejection>,
) -> Result<Json<RevisionResponse>, AppError> {
    let Json(req) = payload?;
    let revision = app
        .service
        .share_with(
            &req.owner,
            &req.grantee,
            &req.resource_ids,
            consistency(req.at_revision),
        )
        .await?;
    Ok(Json(RevisionResponse { revision }))
}
