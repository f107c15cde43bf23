// ABOUTME: Closed error taxonomy shared by the store, auth, router, broker, and public surface.
// ABOUTME: Each variant carries its own gRPC status code and HTTP status code at the boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("permission denied")]
    PermissionDenied,

    #[error("no route for channel")]
    NoRoute,

    #[error("agent is offline")]
    AgentOffline,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        GatewayError::Internal(msg.to_string())
    }

    /// Stable low-cardinality label for metrics; not for display to a caller.
    pub fn metric_reason(&self) -> &'static str {
        match self {
            GatewayError::NotFound => "not_found",
            GatewayError::AlreadyExists => "already_exists",
            GatewayError::Invalid(_) => "invalid",
            GatewayError::Unauthenticated => "unauthenticated",
            GatewayError::PermissionDenied => "permission_denied",
            GatewayError::NoRoute => "no_route",
            GatewayError::AgentOffline => "agent_offline",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Message safe to return to a caller. Internal errors never leak detail.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::NotFound => "not found".to_string(),
            GatewayError::AlreadyExists => "already exists".to_string(),
            GatewayError::Invalid(msg) => msg.clone(),
            GatewayError::Unauthenticated => "unauthenticated".to_string(),
            GatewayError::PermissionDenied => "permission denied".to_string(),
            GatewayError::NoRoute => "no route for channel".to_string(),
            GatewayError::AgentOffline => "agent is offline".to_string(),
            GatewayError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => GatewayError::NotFound,
            other => GatewayError::internal(other),
        }
    }
}

impl From<GatewayError> for tonic::Status {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound => tonic::Status::not_found(err.public_message()),
            GatewayError::AlreadyExists => tonic::Status::already_exists(err.public_message()),
            GatewayError::Invalid(_) => tonic::Status::invalid_argument(err.public_message()),
            GatewayError::Unauthenticated => tonic::Status::unauthenticated(err.public_message()),
            GatewayError::PermissionDenied => tonic::Status::permission_denied(err.public_message()),
            GatewayError::NoRoute => tonic::Status::not_found(err.public_message()),
            GatewayError::AgentOffline => tonic::Status::unavailable(err.public_message()),
            GatewayError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                tonic::Status::internal("internal error")
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::NotFound | GatewayError::NoRoute => StatusCode::NOT_FOUND,
            GatewayError::AlreadyExists => StatusCode::CONFLICT,
            GatewayError::Invalid(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::PermissionDenied => StatusCode::FORBIDDEN,
            GatewayError::AgentOffline => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, axum::Json(json!({ "error": self.public_message() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
