use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};

use crate::error::AppResult;
use crate::services::scheduler::TenantSyncReport;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/:id/sync", post(sync_tenant))
}

/// Resynchronize every recent and upcoming appointment of a tenant
async fn sync_tenant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<TenantSyncReport>> {
    let report = state.synchronizer.sync_tenant(&id).await?;
    Ok(Json(report))
}
