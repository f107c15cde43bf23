// ABOUTME: GET /health and /health/ready — liveness is a bare 200, readiness additionally
// ABOUTME: confirms the store is reachable and reports the online agent count.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn health_ready(State(state): State<AppState>) -> Response {
    match state.store.list_principals(None) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "agents_online": state.manager.list_online().len(),
            })),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not_ready" })),
            )
                .into_response()
        }
    }
}
