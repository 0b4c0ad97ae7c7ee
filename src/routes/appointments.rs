use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{delete, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::AppResult;
use crate::routes::reminders::{require_tenant, TenantRequest};
use crate::services::scheduler::SyncOutcome;
use crate::AppState;

/// Hooks the booking application calls when an appointment changes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id/sync", post(sync_appointment))
        .route("/:id/queue", delete(remove_queue))
}

#[derive(Debug, Serialize)]
pub struct RemoveQueueResponse {
    pub appointment_id: String,
    pub cancelled: usize,
}

/// Created or updated appointment: reconcile its queue entries
async fn sync_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TenantRequest>,
) -> AppResult<Json<SyncOutcome>> {
    let tenant_id = require_tenant(Some(body.tenant_id.as_str()))?;
    let outcome = state.synchronizer.sync_appointment_by_id(tenant_id, &id).await?;
    Ok(Json(outcome))
}

/// Deleted appointment: cancel whatever is still live
async fn remove_queue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<RemoveQueueResponse>> {
    let cancelled = state.synchronizer.remove_for_appointment(&id).await?;
    Ok(Json(RemoveQueueResponse {
        appointment_id: id,
        cancelled,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{
        appointment, directory_with, reminder_template, request, survey_template, tenant, test_state,
        ManualClock, RecordingGateway,
    };
    use axum::http::{Method, StatusCode};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn app() -> Router {
        let now = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let directory = directory_with(tenant("shop", vec![reminder_template(24), survey_template(true)]));
        directory.put_appointment(appointment("a1", "shop", now + Duration::hours(30)));
        let state = test_state(
            directory,
            Arc::new(ManualClock::new(now)),
            Arc::new(RecordingGateway::default()),
        );
        router().with_state(state)
    }

    #[tokio::test]
    async fn sync_then_delete_cancels_both_entries() {
        let app = app();

        let (status, body) = request(
            app.clone(),
            Method::POST,
            "/a1/sync",
            Some(json!({ "tenant_id": "shop" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["appointment_id"], "a1");
        assert_eq!(body["reminder"]["action"], "scheduled");
        assert_eq!(body["survey"]["action"], "scheduled");

        let (status, body) = request(app, Method::DELETE, "/a1/queue", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], 2);
    }

    #[tokio::test]
    async fn sync_of_unknown_appointment_is_not_found() {
        let (status, body) = request(
            app(),
            Method::POST,
            "/missing/sync",
            Some(json!({ "tenant_id": "shop" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }
}
