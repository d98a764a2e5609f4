//! The HTTP interface.
//!
//! | Route                        | Gate                          |
//! |------------------------------|-------------------------------|
//! | `POST /records`              | scope `audit:append`          |
//! | `POST /records/batch`        | scope `audit:append`          |
//! | `GET  /records/search`       | reader role                   |
//! | `GET  /records/verify-chain` | reader role                   |
//! | `GET  /records/export`       | reader role + `audit:export`  |
//! | `GET  /records/stats`        | reader role                   |
//! | `GET  /health`               | none                          |
//!
//! Request bodies are taken as raw bytes and decoded here, so malformed JSON
//! is reported in the same `{code, message}` shape as every other error.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::QueryRejection, DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::info;

use ledger_contracts::{
    capability::{Operation, Principal},
    error::LedgerError,
    query::{SearchCriteria, TimeWindow},
    record::{AuditRecord, RecordId, RecordInput},
};
use ledger_core::traits::AccessPolicy;
use ledger_query::QueryService;
use ledger_verify::ChainVerifier;

use crate::{
    error::ApiError,
    ingest::{IngestPath, Ingestor},
};

/// Largest accepted request body.
const BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub policy: Arc<dyn AccessPolicy>,
    pub queries: Arc<QueryService>,
    pub verifier: Arc<ChainVerifier>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/records", post(append_record))
        .route("/records/batch", post(append_batch))
        .route("/records/search", get(search))
        .route("/records/verify-chain", get(verify_chain))
        .route("/records/export", get(export))
        .route("/records/stats", get(stats))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct AppendResponse {
    pub id: RecordId,
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    records: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub ids: Vec<RecordId>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<AuditRecord>,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WindowParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl WindowParams {
    fn window(&self) -> TimeWindow {
        TimeWindow {
            from: self.from,
            to: self.to,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub is_valid: bool,
    pub broken_at: Option<RecordId>,
    pub total_checked: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatsParams {
    pub days: Option<u32>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Resolve the bearer credential and check it may perform `operation`.
fn authorize(state: &AppState, headers: &HeaderMap, operation: Operation) -> Result<Principal, ApiError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then_some(token)
        });
    let principal = state.policy.authenticate(bearer)?;
    state.policy.authorize(&principal, operation)?;
    Ok(principal)
}

fn params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(params)| params)
        .map_err(|e| ApiError(LedgerError::validation("query", e.body_text())))
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError(LedgerError::validation("body", e.to_string())))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn append_record(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<AppendResponse>), ApiError> {
    let principal = authorize(&state, &headers, Operation::Append)?;
    let input: RecordInput = decode(&body)?;
    let id = state.ingestor.ingest(input, IngestPath::Sync).await?;
    info!(subject = %principal.subject, %id, "record appended");
    Ok((StatusCode::CREATED, Json(AppendResponse { id })))
}

async fn append_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    let principal = authorize(&state, &headers, Operation::Append)?;
    let request: BatchRequest = decode(&body)?;
    let inputs = request
        .records
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value::<RecordInput>(value).map_err(|e| LedgerError::Batch {
                index,
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ids = state.ingestor.ingest_batch(inputs, IngestPath::Sync).await?;
    info!(subject = %principal.subject, count = ids.len(), "batch appended");
    Ok((
        StatusCode::CREATED,
        Json(BatchResponse {
            count: ids.len(),
            ids,
        }),
    ))
}

async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<SearchCriteria>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    authorize(&state, &headers, Operation::Search)?;
    let criteria = params(query)?;
    let items = state.queries.search(&criteria).await?;
    Ok(Json(SearchResponse {
        count: items.len(),
        items: items.as_ref().clone(),
    }))
}

async fn verify_chain(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<WindowParams>, QueryRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let principal = authorize(&state, &headers, Operation::Verify)?;
    let window = params(query)?.window();
    let report = state.verifier.verify(&window).await?;
    info!(subject = %principal.subject, valid = report.valid, checked = report.checked, "chain verification requested");
    Ok(Json(VerifyResponse {
        is_valid: report.valid,
        broken_at: report.broken_at,
        total_checked: report.checked,
        reason: report.reason,
    }))
}

async fn export(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<WindowParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let principal = authorize(&state, &headers, Operation::Export)?;
    let window = params(query)?.window();
    let records = state.queries.export(window)?;
    info!(subject = %principal.subject, from = ?window.from, to = ?window.to, "export started");

    let lines = records.map(|record| {
        record.and_then(|record| {
            let mut line = serde_json::to_vec(&record)
                .map_err(|e| LedgerError::store(format!("record {} encoding failed: {e}", record.id)))?;
            line.push(b'\n');
            Ok(Bytes::from(line))
        })
    });

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"audit_export.ndjson\""),
        ],
        Body::from_stream(lines),
    )
        .into_response())
}

async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<StatsParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, Operation::Stats)?;
    let days = params(query)?.days;
    let stats = state.queries.stats(days).await?;
    Ok(Json(stats).into_response())
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let head = state.ingestor.engine().head().await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "head_sequence": head.map(|h| h.sequence),
    })))
}
