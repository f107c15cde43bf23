// ABOUTME: GET /api/bindings — persisted frontend/channel -> agent bindings, annotated with
// ABOUTME: the agent's display name and live online status from the connection registry.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct BindingSummary {
    pub frontend: String,
    pub channel_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub agent_online: bool,
    pub created_at: String,
}

pub async fn list_bindings(State(state): State<AppState>) -> Response {
    let bindings = match state.store.list_bindings() {
        Ok(b) => b,
        Err(err) => return err.into_response(),
    };

    let mut out = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let agent_name = match state.store.get_principal(&binding.agent_id) {
            Ok(p) => p.display_name,
            Err(_) => binding.agent_id.clone(),
        };
        out.push(BindingSummary {
            frontend: binding.frontend,
            channel_id: binding.channel_id,
            agent_online: state.manager.is_online(&binding.agent_id),
            agent_id: binding.agent_id,
            agent_name,
            created_at: binding.created_at.to_rfc3339(),
        });
    }

    Json(json!({ "bindings": out })).into_response()
}
