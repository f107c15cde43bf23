// ABOUTME: Request gates shared by the gRPC and HTTP surfaces — extract, verify, load, and place
// ABOUTME: an AuthContext on the call. Admin gate and optional-auth variants build on the same core.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::context::AuthContext;
use super::token::TokenSigner;
use crate::error::{GatewayError, Result};
use crate::store::{PrincipalStatus, Store};

#[derive(Clone)]
pub struct AuthState {
    pub store: Store,
    pub signer: TokenSigner,
}

impl AuthState {
    pub fn new(store: Store, signer: TokenSigner) -> Self {
        Self { store, signer }
    }

    /// Core request gate (§4.2): verify the token, load the principal, enforce
    /// its status, load roles, and build an `AuthContext`.
    pub fn authenticate(&self, token: &str) -> Result<AuthContext> {
        let principal_id = self.signer.verify(token)?;
        let principal = self
            .store
            .get_principal(&principal_id)
            .map_err(|_| GatewayError::Unauthenticated)?;

        match principal.status {
            PrincipalStatus::Approved | PrincipalStatus::Online | PrincipalStatus::Offline => {}
            PrincipalStatus::Pending => return Err(GatewayError::PermissionDenied),
            PrincipalStatus::Revoked => return Err(GatewayError::PermissionDenied),
        }

        let roles = self.store.list_roles(&principal.id)?;
        Ok(AuthContext {
            principal_id: principal.id,
            principal_type: principal.principal_type,
            roles,
        })
    }

    /// Same pipeline but swallows any failure, returning `None`. Used where a
    /// route behaves differently for authenticated vs anonymous callers.
    pub fn authenticate_optional(&self, token: Option<&str>) -> Option<AuthContext> {
        token.and_then(|t| self.authenticate(t).ok())
    }
}

pub fn require_admin(ctx: &AuthContext) -> Result<()> {
    if ctx.is_admin() {
        Ok(())
    } else {
        Err(GatewayError::PermissionDenied)
    }
}

pub fn bearer_token(header_value: Option<&str>) -> Option<&str> {
    header_value?.strip_prefix("Bearer ")
}

/// axum middleware: required auth. Inserts `AuthContext` as a request extension.
pub async fn http_auth_middleware(
    State(auth): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> std::result::Result<Response, GatewayError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(GatewayError::Unauthenticated)?
        .to_string();

    let ctx = auth.authenticate(&token)?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// axum middleware: admin-gated. Assumes `http_auth_middleware` already ran.
pub async fn http_admin_middleware(
    req: Request,
    next: Next,
) -> std::result::Result<Response, GatewayError> {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .cloned()
        .ok_or(GatewayError::Unauthenticated)?;
    require_admin(&ctx)?;
    Ok(next.run(req).await)
}

/// axum middleware: optional auth — never rejects, just attaches whatever it
/// could authenticate (possibly nothing) as `Option<AuthContext>`.
pub async fn http_optional_auth_middleware(
    State(auth): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> std::result::Result<Response, GatewayError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);

    let ctx = auth.authenticate_optional(token.as_deref());
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// tonic interceptor applying the same gate to unary and streaming RPCs.
#[derive(Clone)]
pub struct GrpcAuthInterceptor {
    pub auth: Arc<AuthState>,
}

impl tonic::service::Interceptor for GrpcAuthInterceptor {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> std::result::Result<tonic::Request<()>, tonic::Status> {
        let token = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
            .ok_or_else(|| tonic::Status::unauthenticated("missing bearer token"))?;

        let ctx = self.auth.authenticate(&token).map_err(tonic::Status::from)?;
        request.extensions_mut().insert(ctx);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PrincipalType;

    fn state() -> (AuthState, crate::store::Principal) {
        let store = Store::open_in_memory().unwrap();
        let principal = store
            .create_principal(PrincipalType::Client, "c1", None, None)
            .unwrap();
        store
            .set_principal_status(&principal.id, PrincipalStatus::Approved)
            .unwrap();
        let signer = TokenSigner::new(b"test-secret".to_vec());
        (AuthState::new(store, signer), principal)
    }

    #[test]
    fn approved_principal_authenticates() {
        let (auth, principal) = state();
        let (token, _) = auth
            .signer
            .issue(&principal.id, chrono::Duration::hours(1))
            .unwrap();
        let ctx = auth.authenticate(&token).unwrap();
        assert_eq!(ctx.principal_id, principal.id);
    }

    #[test]
    fn pending_principal_is_permission_denied() {
        let store = Store::open_in_memory().unwrap();
        let principal = store
            .create_principal(PrincipalType::Client, "c1", None, None)
            .unwrap();
        let signer = TokenSigner::new(b"test-secret".to_vec());
        let auth = AuthState::new(store, signer);
        let (token, _) = auth
            .signer
            .issue(&principal.id, chrono::Duration::hours(1))
            .unwrap();
        let err = auth.authenticate(&token).unwrap_err();
        assert!(matches!(err, GatewayError::PermissionDenied));
    }

    #[test]
    fn revoked_principal_is_permission_denied() {
        let (auth, principal) = state();
        auth.store
            .set_principal_status(&principal.id, PrincipalStatus::Revoked)
            .unwrap();
        let (token, _) = auth
            .signer
            .issue(&principal.id, chrono::Duration::hours(1))
            .unwrap();
        let err = auth.authenticate(&token).unwrap_err();
        assert!(matches!(err, GatewayError::PermissionDenied));
    }

    #[test]
    fn admin_gate_rejects_without_role() {
        let (auth, principal) = state();
        let (token, _) = auth
            .signer
            .issue(&principal.id, chrono::Duration::hours(1))
            .unwrap();
        let ctx = auth.authenticate(&token).unwrap();
        assert!(require_admin(&ctx).is_err());

        auth.store.add_role(&principal.id, "admin").unwrap();
        let ctx = auth.authenticate(&token).unwrap();
        assert!(require_admin(&ctx).is_ok());
    }

    #[test]
    fn optional_auth_swallows_failure() {
        let (auth, _principal) = state();
        assert!(auth.authenticate_optional(None).is_none());
        assert!(auth.authenticate_optional(Some("garbage")).is_none());
    }

    #[test]
    fn bearer_token_strips_prefix() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("abc")), None);
        assert_eq!(bearer_token(None), None);
    }
}
