use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{MessageLog, QueueEntry, QueueStatus};
use crate::error::{AppError, AppResult};
use crate::services::delivery::{RunAllReport, RunReport};
use crate::AppState;

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 200;

/// Read and operator routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/queue", get(list_queue))
        .route("/queue/:id", delete(cancel_entry))
        .route("/logs", get(list_logs))
}

/// Routes that hit the messaging gateway; mounted behind the rate limiter.
pub fn trigger_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/run", post(run_for_tenant))
        .route("/run-all", post(run_all))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TenantRequest {
    #[serde(alias = "tenantId")]
    pub tenant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    pub tenant_id: Option<String>,
    pub status: Option<String>,
    pub sync: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueItemResponse {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub appointment_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct QueueListResponse {
    pub items: Vec<QueueItemResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tenant_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub items: Vec<MessageLog>,
}

pub(crate) fn require_tenant(tenant_id: Option<&str>) -> AppResult<&str> {
    tenant_id
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("tenant_id is required".to_string()))
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Deliver every due entry of one tenant now
async fn run_for_tenant(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TenantRequest>,
) -> AppResult<Json<RunReport>> {
    let tenant_id = require_tenant(Some(body.tenant_id.as_str()))?;
    let report = state.worker.run_for_tenant(tenant_id).await?;
    Ok(Json(report))
}

/// Deliver due entries of every tenant
async fn run_all(State(state): State<Arc<AppState>>) -> AppResult<Json<RunAllReport>> {
    let report = state.worker.run_all().await?;
    Ok(Json(report))
}

/// Queue entries of a tenant with the client and start time of each appointment
async fn list_queue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueQuery>,
) -> AppResult<Json<QueueListResponse>> {
    let tenant_id = require_tenant(query.tenant_id.as_deref())?;
    let status = match query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => Some(
            QueueStatus::from_str(raw)
                .ok_or_else(|| AppError::BadRequest(format!("unknown status: {}", raw)))?,
        ),
        None => None,
    };

    if is_truthy(query.sync.as_deref()) {
        state.synchronizer.sync_tenant(tenant_id).await?;
    }

    let entries = state.store.list_all(tenant_id, status).await?;

    let mut ids: Vec<String> = entries.iter().map(|e| e.appointment_id.clone()).collect();
    ids.sort();
    ids.dedup();
    let appointments: HashMap<String, _> = state
        .directory
        .find_appointments(tenant_id, &ids)
        .await?
        .into_iter()
        .map(|a| (a.id.clone(), a))
        .collect();

    let items: Vec<QueueItemResponse> = entries
        .into_iter()
        .map(|entry| {
            let appointment = appointments.get(&entry.appointment_id);
            QueueItemResponse {
                client_name: appointment.map(|a| a.client_name.clone()),
                client_phone: appointment.and_then(|a| a.client_phone.clone()),
                appointment_start: appointment.map(|a| a.start_time),
                entry,
            }
        })
        .collect();

    Ok(Json(QueueListResponse {
        total: items.len(),
        items,
    }))
}

/// Cancel one queue entry
async fn cancel_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<CancelQuery>,
) -> AppResult<Json<QueueEntry>> {
    let entry = state
        .synchronizer
        .cancel_entry(&id, query.reason.as_deref())
        .await?;
    Ok(Json(entry))
}

/// Latest delivery log records of a tenant, newest first
async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<LogsResponse>> {
    let tenant_id = require_tenant(query.tenant_id.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let items = state.message_log.list(tenant_id, limit).await?;
    Ok(Json(LogsResponse { items }))
}
