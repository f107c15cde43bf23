// ABOUTME: GET /api/agents — online agents as seen by the in-memory connection registry.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub capabilities: Vec<String>,
}

pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentSummary>> {
    let agents = state
        .manager
        .list_online()
        .into_iter()
        .map(|a| AgentSummary {
            id: a.agent_id,
            name: a.name,
            capabilities: a.capabilities,
        })
        .collect();
    Json(agents)
}
