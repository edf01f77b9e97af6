//! HTTP API.
//!
//! The caller's organization arrives in the `x-org-id` header, set by the
//! upstream auth layer. A request without it is anonymous and only ever
//! sees published uploads.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/uploads/{upload_id}/ingested` | Transport hook: start indexing an upload |
//! | `POST` | `/index/ensure` | Ensure a file is (being) indexed |
//! | `GET`  | `/index/{doc_hash}/progress` | Current status and stage |
//! | `GET`  | `/index/{doc_hash}/history` | Transition log |
//! | `GET`  | `/tenders/{tender_id}/ingestion` | Tender-level ingestion summary |
//! | `POST` | `/ask` | Metered question answering over one file |
//! | `POST` | `/brief` | Metered tender brief of one file |
//! | `POST` | `/preview` | Page preview entitlement check |
//! | `POST` | `/access/check` | Entitlement check for cover letter / folder chat |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_indexed", "message": "document is not indexed (status: EMBEDDING)" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `not_found` (404), `unsupported_file_type` (415), `not_indexed` (422),
//! `internal` (500). Plan denials use status 402 with the plan error code
//! (`TRIAL_EXPIRED`, `TENDER_BRIEF_LIMIT`, ...).

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use tender_index_core::gate::{AccessContext, Grant};
use tender_index_core::models::{AccessLevel, DocumentEvent, IndexState, Progress};
use tender_index_core::plan::Feature;
use tender_index_core::resolver::{resolve, Intent, ResolveError, ResolvedDocument};
use tender_index_core::retrieval::{AskAnswer, Brief, BriefLength};
use tender_index_core::store::UploadCatalog;

use crate::engine::EngineError;
use crate::gate::GateError;
use crate::pipeline::EnsureOptions;
use crate::progress::{self, TenderSummary};
use crate::services::Services;

/// Header carrying the authenticated caller's organization.
pub const ORG_HEADER: &str = "x-org-id";

/// Build the router over `services`.
pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/uploads/{upload_id}/ingested", post(handle_ingested))
        .route("/index/ensure", post(handle_ensure))
        .route("/index/{doc_hash}/progress", get(handle_progress))
        .route("/index/{doc_hash}/history", get(handle_history))
        .route("/tenders/{tender_id}/ingestion", get(handle_tender_ingestion))
        .route("/ask", post(handle_ask))
        .route("/brief", post(handle_brief))
        .route("/preview", post(handle_preview))
        .route("/access/check", post(handle_access_check))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(services)
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(services: Services) -> anyhow::Result<()> {
    let bind_addr = services.config.server.bind.clone();
    let app = router(services);

    info!(bind = %bind_addr, "tender index server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
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

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
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
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::FORBIDDEN, "forbidden", message)
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "internal error",
    )
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        internal(err)
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => not_found(err.to_string()),
            ResolveError::Forbidden => forbidden(err.to_string()),
            ResolveError::UnsupportedFileType(_) => AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_file_type",
                err.to_string(),
            ),
            ResolveError::Internal(e) => internal(e),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotIndexed(_) => AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "not_indexed",
                err.to_string(),
            ),
            EngineError::BadRequest(msg) => bad_request(msg),
            EngineError::Internal(e) => internal(e),
        }
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Denied(plan) => {
                AppError::new(StatusCode::PAYMENT_REQUIRED, plan.code(), plan.to_string())
            }
            GateError::UnknownOrg(_) => unauthorized(err.to_string()),
            GateError::Internal(e) => internal(e),
        }
    }
}

// ============ Caller ============

fn caller(headers: &HeaderMap) -> AccessLevel {
    headers
        .get(ORG_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(AccessLevel::member)
        .unwrap_or(AccessLevel::Public)
}

/// Org id of a member caller; metered and write operations need one.
fn member_org(access: &AccessLevel) -> Result<&str, AppError> {
    access
        .org_id()
        .ok_or_else(|| unauthorized(format!("missing {} header", ORG_HEADER)))
}

async fn resolve_file(
    services: &Services,
    access: &AccessLevel,
    file: &str,
    intent: Intent,
) -> Result<ResolvedDocument, AppError> {
    Ok(resolve(services.store.as_ref(), file, access, intent).await?)
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

// ============ Indexing ============

#[derive(Serialize)]
struct IngestedResponse {
    /// `None` when the upload was skipped (anonymous or not indexable).
    state: Option<IndexState>,
}

async fn handle_ingested(
    State(services): State<Services>,
    headers: HeaderMap,
    Path(upload_id): Path<String>,
) -> Result<Json<IngestedResponse>, AppError> {
    let access = caller(&headers);
    let org_id = member_org(&access)?;
    let upload = services
        .store
        .upload(&upload_id)
        .await?
        .ok_or_else(|| not_found(format!("upload not found: {}", upload_id)))?;
    if upload.org_id.as_deref().is_some_and(|o| o != org_id) {
        return Err(forbidden("upload belongs to another organization"));
    }
    let state = services.pipeline.trigger_ingestion(&upload_id).await?;
    Ok(Json(IngestedResponse { state }))
}

#[derive(Deserialize)]
struct EnsureRequest {
    file: String,
    #[serde(default)]
    restart: bool,
}

async fn handle_ensure(
    State(services): State<Services>,
    headers: HeaderMap,
    Json(req): Json<EnsureRequest>,
) -> Result<(StatusCode, Json<IndexState>), AppError> {
    let access = caller(&headers);
    member_org(&access)?;
    let resolved = resolve_file(&services, &access, &req.file, Intent::Write).await?;
    let state = services
        .pipeline
        .ensure_index(
            &resolved,
            EnsureOptions {
                restart_failed: req.restart,
            },
        )
        .await?;
    let status = if state.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(state)))
}

async fn handle_progress(
    State(services): State<Services>,
    headers: HeaderMap,
    Path(doc_hash): Path<String>,
) -> Result<Json<Progress>, AppError> {
    let access = caller(&headers);
    progress::progress(services.store.as_ref(), &access, &doc_hash)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", doc_hash)))
}

#[derive(Serialize)]
struct HistoryResponse {
    doc_hash: String,
    events: Vec<DocumentEvent>,
}

async fn handle_history(
    State(services): State<Services>,
    headers: HeaderMap,
    Path(doc_hash): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let access = caller(&headers);
    let events = progress::history(services.store.as_ref(), &access, &doc_hash)
        .await?
        .ok_or_else(|| not_found(format!("document not found: {}", doc_hash)))?;
    Ok(Json(HistoryResponse { doc_hash, events }))
}

async fn handle_tender_ingestion(
    State(services): State<Services>,
    headers: HeaderMap,
    Path(tender_id): Path<String>,
) -> Result<Json<TenderSummary>, AppError> {
    let access = caller(&headers);
    let org_id = member_org(&access)?;
    let summary = progress::tender_summary(services.store.as_ref(), org_id, &tender_id).await?;
    Ok(Json(summary))
}

// ============ Metered generation ============

#[derive(Deserialize)]
struct AskRequest {
    file: String,
    question: String,
}

async fn handle_ask(
    State(services): State<Services>,
    headers: HeaderMap,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskAnswer>, AppError> {
    let access = caller(&headers);
    let org_id = member_org(&access)?;
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let resolved = resolve_file(&services, &access, &req.file, Intent::Read).await?;
    services.engine.require_ready(&resolved).await?;
    let ctx = AccessContext::tender(resolved.tender_id.clone());
    let answer = services
        .gate
        .metered(org_id, Feature::Chat, &ctx, async {
            services
                .engine
                .ask(&resolved, &req.question)
                .await
                .map_err(AppError::from)
        })
        .await?;
    Ok(Json(answer))
}

#[derive(Deserialize)]
struct BriefRequest {
    file: String,
    #[serde(default)]
    length: Option<String>,
}

async fn handle_brief(
    State(services): State<Services>,
    headers: HeaderMap,
    Json(req): Json<BriefRequest>,
) -> Result<Json<Brief>, AppError> {
    let access = caller(&headers);
    let org_id = member_org(&access)?;
    let length = match req.length.as_deref() {
        None => BriefLength::Medium,
        Some(s) => BriefLength::parse(s)
            .ok_or_else(|| bad_request(format!("unknown brief length: {}", s)))?,
    };
    let resolved = resolve_file(&services, &access, &req.file, Intent::Read).await?;
    services.engine.require_ready(&resolved).await?;
    let ctx = AccessContext::tender(resolved.tender_id.clone());
    let brief = services
        .gate
        .metered(org_id, Feature::Brief, &ctx, async {
            services
                .engine
                .brief(&resolved, length)
                .await
                .map_err(AppError::from)
        })
        .await?;
    Ok(Json(brief))
}

// ============ Entitlement checks ============

#[derive(Deserialize)]
struct PreviewRequest {
    file: String,
    page: i64,
}

#[derive(Serialize)]
struct PreviewResponse {
    page: i64,
    grant: Grant,
}

async fn handle_preview(
    State(services): State<Services>,
    headers: HeaderMap,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, AppError> {
    let access = caller(&headers);
    let org_id = member_org(&access)?;
    if req.page < 1 {
        return Err(bad_request("page must be >= 1"));
    }
    let resolved = resolve_file(&services, &access, &req.file, Intent::Read).await?;
    let ctx = AccessContext::tender(resolved.tender_id).page(req.page);
    let grant = services
        .gate
        .enforce_access(org_id, Feature::PagePreview, &ctx)
        .await?;
    Ok(Json(PreviewResponse {
        page: req.page,
        grant,
    }))
}

#[derive(Deserialize)]
struct AccessCheckRequest {
    feature: String,
    tender_id: String,
}

async fn handle_access_check(
    State(services): State<Services>,
    headers: HeaderMap,
    Json(req): Json<AccessCheckRequest>,
) -> Result<Json<Grant>, AppError> {
    let access = caller(&headers);
    let org_id = member_org(&access)?;
    let feature = match Feature::parse(&req.feature) {
        Some(f @ (Feature::CoverLetter | Feature::FolderChat)) => f,
        Some(other) => {
            return Err(bad_request(format!(
                "{} is metered through its own endpoint",
                other.as_str()
            )))
        }
        None => return Err(bad_request(format!("unknown feature: {}", req.feature))),
    };
    let grant = services
        .gate
        .enforce_access(org_id, feature, &AccessContext::tender(req.tender_id))
        .await?;
    Ok(Json(grant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn caller_defaults_to_public() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller(&headers), AccessLevel::Public);
        headers.insert(ORG_HEADER, HeaderValue::from_static("  "));
        assert_eq!(caller(&headers), AccessLevel::Public);
        headers.insert(ORG_HEADER, HeaderValue::from_static("org-a"));
        assert_eq!(caller(&headers), AccessLevel::member("org-a"));
    }

    #[test]
    fn plan_denial_maps_to_402_with_plan_code() {
        let e = AppError::from(GateError::Denied(
            tender_index_core::gate::PlanError::TenderBriefLimit,
        ));
        assert_eq!(e.status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(e.code, "TENDER_BRIEF_LIMIT");
    }

    #[test]
    fn resolver_errors_map_to_http() {
        let e = AppError::from(ResolveError::UnsupportedFileType("image/png".into()));
        assert_eq!(e.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(e.code, "unsupported_file_type");
        assert_eq!(AppError::from(ResolveError::Forbidden).status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn not_indexed_is_422() {
        let e = AppError::from(EngineError::NotIndexed(None));
        assert_eq!(e.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(e.code, "not_indexed");
    }
}
