// ABOUTME: HTTP surface — axum router mounting /api/send (SSE), /api/agents, /api/bindings,
// ABOUTME: and the health pair. Thin adapters over the same Broker/Store/AgentManager the gRPC
// ABOUTME: services use.

mod agents;
mod bindings;
mod health;
mod metrics;
mod send;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router as AxumRouter;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::middleware::{http_optional_auth_middleware, AuthState};
use crate::broker::Broker;
use crate::manager::AgentManager;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub manager: Arc<AgentManager>,
    pub broker: Arc<Broker>,
}

/// Builds the full HTTP router. `POST /api/send` runs behind optional auth
/// (an anonymous frontend bridge is a legitimate caller; `actor_principal_id`
/// is simply absent on the resulting ledger event) while everything else
/// that exposes gateway state stays open to any bearer the optional gate
/// could authenticate — the admin-only surface lives on the gRPC AdminService.
/// `/metrics` sits outside the auth layer entirely: it's a scrape target, not
/// a gateway operation.
pub fn build_router(
    state: AppState,
    auth: Arc<AuthState>,
    metrics_handle: PrometheusHandle,
) -> AxumRouter {
    let api = AxumRouter::new()
        .route("/api/send", post(send::send_message))
        .route("/api/agents", get(agents::list_agents))
        .route("/api/bindings", get(bindings::list_bindings))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::health_ready))
        .layer(axum::middleware::from_fn_with_state(
            auth,
            http_optional_auth_middleware,
        ))
        .with_state(state);

    let metrics_router =
        AxumRouter::new().route("/metrics", get(move || metrics::render(metrics_handle.clone())));

    api.merge(metrics_router)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}
