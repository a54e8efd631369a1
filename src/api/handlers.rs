use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::contracts::{DocumentRecord, DocumentStore, IssueError, SequenceRegistry, StorageError};
use crate::metrics::MetricsRegistry;
use crate::numbering::{Allocator, Clock, DocumentType, IssuedDocument, MAX_HISTORY_LIMIT};

/// Rows returned by `GET /documents` when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Application state shared across handlers.
pub struct AppState<R, D, C> {
    pub allocator: Allocator<R, D, C>,
    pub metrics_registry: Arc<MetricsRegistry>,
}

impl<R, D, C> AppState<R, D, C>
where
    R: SequenceRegistry,
    D: DocumentStore,
    C: Clock,
{
    /// Wires the allocator's issue metrics into `metrics_registry`.
    pub fn new(allocator: Allocator<R, D, C>, metrics_registry: Arc<MetricsRegistry>) -> Self {
        let allocator = allocator.with_metrics(Arc::clone(&metrics_registry.issue));
        Self {
            allocator,
            metrics_registry,
        }
    }
}

/// Request body for `POST /documents`.
#[derive(Debug, Deserialize)]
pub struct IssueDocumentRequest {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub destination: String,
    /// `DD/MM/YYYY`; today when omitted
    #[serde(default)]
    pub issue_date: Option<String>,
}

/// A document as returned by the API.
#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub id: u64,
    pub number: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub type_key: String,
    pub series: String,
    pub destination: String,
    pub issue_date: String,
}

impl From<DocumentRecord> for DocumentView {
    fn from(record: DocumentRecord) -> Self {
        Self {
            id: record.id,
            number: record.number,
            doc_type: record.doc_type,
            type_key: record.type_key,
            series: record.series,
            destination: record.destination,
            issue_date: record.issue_date,
        }
    }
}

/// Response for `POST /documents`.
#[derive(Debug, Serialize)]
pub struct IssueDocumentResponse {
    #[serde(flatten)]
    pub document: DocumentView,
    pub attempts: u32,
}

impl From<IssuedDocument> for IssueDocumentResponse {
    fn from(issued: IssuedDocument) -> Self {
        Self {
            document: issued.record.into(),
            attempts: issued.attempts,
        }
    }
}

/// Query parameters for `GET /documents`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    /// `YYYY-MM-DD`
    pub date: Option<String>,
    pub limit: Option<String>,
}

/// Response for `GET /documents`.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub documents: Vec<DocumentView>,
    pub count: usize,
}

/// Response for `GET /document-types`.
#[derive(Debug, Serialize)]
pub struct DocumentTypesResponse {
    pub types: Vec<DocumentType>,
    pub count: usize,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    Issue(IssueError),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            ApiError::Issue(IssueError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            ApiError::Issue(IssueError::ExhaustedRetries { .. }) => {
                (StatusCode::CONFLICT, "ALLOCATION_EXHAUSTED")
            }
            ApiError::Issue(IssueError::Storage(StorageError::Unavailable(_))) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
            }
            ApiError::Issue(IssueError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        };
        let error = match self {
            ApiError::Issue(e) => e.to_string(),
            ApiError::BadRequest(msg) => msg,
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.into(),
            }),
        )
            .into_response()
    }
}

impl From<IssueError> for ApiError {
    fn from(e: IssueError) -> Self {
        ApiError::Issue(e)
    }
}

/// POST /documents
/// Allocates the next number for a document type and records the document.
pub async fn issue_document<R, D, C>(
    State(state): State<Arc<AppState<R, D, C>>>,
    body: Bytes,
) -> Result<(StatusCode, Json<IssueDocumentResponse>), ApiError>
where
    R: SequenceRegistry,
    D: DocumentStore,
    C: Clock,
{
    let request: IssueDocumentRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;

    let issued = state
        .allocator
        .issue_and_save(
            &request.doc_type,
            &request.destination,
            request.issue_date.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(issued.into())))
}

/// GET /documents
/// Issued documents, newest first.
pub async fn list_documents<R, D, C>(
    State(state): State<Arc<AppState<R, D, C>>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError>
where
    R: SequenceRegistry,
    D: DocumentStore,
    C: Clock,
{
    let start = Instant::now();
    let limit = parse_limit(query.limit.as_deref())?;

    // An empty `type=` or `date=` means no filter
    let doc_type = query.doc_type.as_deref().filter(|s| !s.trim().is_empty());
    let date = query.date.as_deref().filter(|s| !s.trim().is_empty());

    let records = state.allocator.history(doc_type, date, Some(limit)).await?;
    let documents: Vec<DocumentView> = records.into_iter().map(DocumentView::from).collect();
    let count = documents.len();

    state
        .metrics_registry
        .history
        .record_query(count as u64, start.elapsed().as_micros() as u64);

    Ok(Json(HistoryResponse { documents, count }))
}

fn parse_limit(raw: Option<&str>) -> Result<usize, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(DEFAULT_HISTORY_LIMIT),
        Some(raw) => match raw.parse::<usize>() {
            Ok(0) | Err(_) => Err(ApiError::BadRequest(format!(
                "limit must be a positive integer, got '{}'",
                raw
            ))),
            Ok(n) => Ok(n.min(MAX_HISTORY_LIMIT)),
        },
    }
}

/// GET /document-types
pub async fn document_types<R, D, C>(
    State(state): State<Arc<AppState<R, D, C>>>,
) -> Json<DocumentTypesResponse>
where
    R: SequenceRegistry,
    D: DocumentStore,
    C: Clock,
{
    let types = state.allocator.catalog().types().to_vec();
    let count = types.len();
    Json(DocumentTypesResponse { types, count })
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

/// GET /metrics
/// Prometheus text exposition format.
pub async fn metrics<R, D, C>(State(state): State<Arc<AppState<R, D, C>>>) -> impl IntoResponse
where
    R: SequenceRegistry,
    D: DocumentStore,
    C: Clock,
{
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics_registry.format_prometheus(),
    )
}
