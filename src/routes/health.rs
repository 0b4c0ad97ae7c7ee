use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::config::QueueBackend;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub queue_backend: QueueBackend,
    pub delivery_enabled: bool,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        queue_backend: state.config.queue.backend,
        delivery_enabled: state.config.delivery.enabled,
    };

    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{request, test_state, InMemoryDirectory, ManualClock, RecordingGateway};
    use axum::{http::Method, routing::get, Router};

    #[tokio::test]
    async fn reports_healthy() {
        let state = test_state(
            Arc::new(InMemoryDirectory::default()),
            Arc::new(ManualClock::new(chrono::Utc::now())),
            Arc::new(RecordingGateway::default()),
        );
        let app = Router::new().route("/health", get(health_check)).with_state(state);

        let (status, body) = request(app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["queue_backend"], "sqlite");
    }
}
