// ABOUTME: AdminService — principal, binding, token, and audit administration, all gated by
// ABOUTME: the admin/owner role. Every mutation appends an audit entry.

use serde_json::json;
use tonic::{Request, Response, Status};

use crate::auth::context::AuthContext;
use crate::auth::middleware::require_admin;
use crate::auth::token::TokenSigner;
use crate::error::GatewayError;
use crate::pb;
use crate::store::{Binding, Principal, PrincipalType, Store};

pub struct AdminServiceImpl {
    store: Store,
    signer: TokenSigner,
}

impl AdminServiceImpl {
    pub fn new(store: Store, signer: TokenSigner) -> Self {
        Self { store, signer }
    }

    fn auth_ctx<T>(request: &Request<T>) -> Result<AuthContext, Status> {
        request
            .extensions()
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| Status::unauthenticated("missing auth context"))
    }
}

fn binding_to_proto(b: Binding) -> pb::BindingInfo {
    pb::BindingInfo {
        id: b.id,
        frontend: b.frontend,
        channel_id: b.channel_id,
        agent_id: b.agent_id,
        created_at: b.created_at.to_rfc3339(),
    }
}

fn principal_to_proto(p: Principal, roles: Vec<String>) -> pb::PrincipalInfo {
    pb::PrincipalInfo {
        id: p.id,
        principal_type: p.principal_type.as_str().to_string(),
        display_name: p.display_name,
        status: p.status.as_str().to_string(),
        roles,
        created_at: p.created_at.to_rfc3339(),
    }
}

#[tonic::async_trait]
impl pb::admin_service_server::AdminService for AdminServiceImpl {
    async fn list_bindings(
        &self,
        request: Request<pb::ListBindingsRequest>,
    ) -> Result<Response<pb::ListBindingsResponse>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        require_admin(&ctx).map_err(Status::from)?;

        let bindings = self
            .store
            .list_bindings()
            .map_err(Status::from)?
            .into_iter()
            .map(binding_to_proto)
            .collect();
        Ok(Response::new(pb::ListBindingsResponse { bindings }))
    }

    async fn create_binding(
        &self,
        request: Request<pb::CreateBindingRequest>,
    ) -> Result<Response<pb::BindingInfo>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        require_admin(&ctx).map_err(Status::from)?;
        let req = request.into_inner();

        let binding = self
            .store
            .create_binding(&req.frontend, &req.channel_id, &req.agent_id, Some(&ctx.principal_id))
            .map_err(Status::from)?;

        self.store
            .append_audit_entry(
                &ctx.principal_id,
                "create_binding",
                "binding",
                &binding.id,
                json!({ "frontend": req.frontend, "channel_id": req.channel_id, "agent_id": req.agent_id }),
            )
            .map_err(Status::from)?;

        Ok(Response::new(binding_to_proto(binding)))
    }

    async fn update_binding(
        &self,
        request: Request<pb::UpdateBindingRequest>,
    ) -> Result<Response<pb::BindingInfo>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        require_admin(&ctx).map_err(Status::from)?;
        let req = request.into_inner();

        let binding = self
            .store
            .update_binding_agent(&req.id, &req.agent_id)
            .map_err(Status::from)?;

        self.store
            .append_audit_entry(
                &ctx.principal_id,
                "update_binding",
                "binding",
                &binding.id,
                json!({ "agent_id": req.agent_id }),
            )
            .map_err(Status::from)?;

        Ok(Response::new(binding_to_proto(binding)))
    }

    async fn delete_binding(
        &self,
        request: Request<pb::DeleteBindingRequest>,
    ) -> Result<Response<pb::DeleteBindingResponse>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        require_admin(&ctx).map_err(Status::from)?;
        let req = request.into_inner();

        self.store.delete_binding(&req.id).map_err(Status::from)?;

        self.store
            .append_audit_entry(&ctx.principal_id, "delete_binding", "binding", &req.id, json!({}))
            .map_err(Status::from)?;

        Ok(Response::new(pb::DeleteBindingResponse {}))
    }

    async fn list_principals(
        &self,
        request: Request<pb::ListPrincipalsRequest>,
    ) -> Result<Response<pb::ListPrincipalsResponse>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        require_admin(&ctx).map_err(Status::from)?;
        let req = request.into_inner();

        let filter = req
            .principal_type
            .map(|s| PrincipalType::parse(&s))
            .transpose()
            .map_err(Status::from)?;

        let principals = self.store.list_principals(filter).map_err(Status::from)?;
        let mut out = Vec::with_capacity(principals.len());
        for p in principals {
            let roles = self.store.list_roles(&p.id).map_err(Status::from)?;
            out.push(principal_to_proto(p, roles));
        }
        Ok(Response::new(pb::ListPrincipalsResponse { principals: out }))
    }

    async fn create_principal(
        &self,
        request: Request<pb::CreatePrincipalRequest>,
    ) -> Result<Response<pb::PrincipalInfo>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        require_admin(&ctx).map_err(Status::from)?;
        let req = request.into_inner();

        let principal_type = PrincipalType::parse(&req.principal_type).map_err(Status::from)?;
        let principal = self
            .store
            .create_principal(
                principal_type,
                &req.display_name,
                req.pubkey.as_deref(),
                req.pubkey_fingerprint.as_deref(),
            )
            .map_err(Status::from)?;

        for role in &req.roles {
            self.store.add_role(&principal.id, role).map_err(Status::from)?;
        }

        self.store
            .append_audit_entry(
                &ctx.principal_id,
                "create_principal",
                "principal",
                &principal.id,
                json!({ "principal_type": req.principal_type, "display_name": req.display_name }),
            )
            .map_err(Status::from)?;

        let roles = self.store.list_roles(&principal.id).map_err(Status::from)?;
        Ok(Response::new(principal_to_proto(principal, roles)))
    }

    async fn delete_principal(
        &self,
        request: Request<pb::DeletePrincipalRequest>,
    ) -> Result<Response<pb::DeletePrincipalResponse>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        require_admin(&ctx).map_err(Status::from)?;
        let req = request.into_inner();

        self.store.delete_principal(&req.id).map_err(Status::from)?;

        self.store
            .append_audit_entry(&ctx.principal_id, "delete_principal", "principal", &req.id, json!({}))
            .map_err(Status::from)?;

        Ok(Response::new(pb::DeletePrincipalResponse {}))
    }

    async fn create_token(
        &self,
        request: Request<pb::CreateTokenRequest>,
    ) -> Result<Response<pb::CreateTokenResponse>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        require_admin(&ctx).map_err(Status::from)?;
        let req = request.into_inner();

        // Confirm the target principal exists before minting a token for it.
        self.store.get_principal(&req.principal_id).map_err(Status::from)?;

        let (token, expires_at) = self
            .signer
            .issue(&req.principal_id, chrono::Duration::seconds(req.ttl_seconds as i64))
            .map_err(Status::from)?;

        self.store
            .append_audit_entry(
                &ctx.principal_id,
                "create_token",
                "principal",
                &req.principal_id,
                json!({ "ttl_seconds": req.ttl_seconds }),
            )
            .map_err(Status::from)?;

        Ok(Response::new(pb::CreateTokenResponse {
            token,
            expires_at: expires_at.to_rfc3339(),
        }))
    }

    async fn list_audit_entries(
        &self,
        request: Request<pb::ListAuditEntriesRequest>,
    ) -> Result<Response<pb::ListAuditEntriesResponse>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        require_admin(&ctx).map_err(Status::from)?;
        let req = request.into_inner();

        let entries = self
            .store
            .list_audit_entries(req.limit.map(|l| l as i64))
            .map_err(Status::from)?
            .into_iter()
            .map(|e| pb::AuditEntryInfo {
                id: e.id,
                actor_principal_id: e.actor_principal_id,
                action: e.action,
                target_type: e.target_type,
                target_id: e.target_id,
                timestamp: e.timestamp.to_rfc3339(),
                detail_json: e.detail.to_string(),
            })
            .collect();

        Ok(Response::new(pb::ListAuditEntriesResponse { entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin_ctx(store: &Store) -> AuthContext {
        let admin = store
            .create_principal(PrincipalType::Member, "root", None, None)
            .unwrap();
        store.add_role(&admin.id, "admin").unwrap();
        AuthContext {
            principal_id: admin.id,
            principal_type: PrincipalType::Member,
            roles: vec!["admin".to_string()],
        }
    }

    fn with_ctx<T>(mut request: Request<T>, ctx: AuthContext) -> Request<T> {
        request.extensions_mut().insert(ctx);
        request
    }

    #[tokio::test]
    async fn create_binding_requires_admin() {
        let store = Store::open_in_memory().unwrap();
        let signer = TokenSigner::new(b"secret".to_vec());
        let agent = store
            .create_principal(PrincipalType::Agent, "a1", None, None)
            .unwrap();
        let svc = AdminServiceImpl::new(store, signer);

        let non_admin = AuthContext {
            principal_id: "someone".to_string(),
            principal_type: PrincipalType::Client,
            roles: vec![],
        };
        let request = with_ctx(
            Request::new(pb::CreateBindingRequest {
                frontend: "matrix".to_string(),
                channel_id: "!room".to_string(),
                agent_id: agent.id.clone(),
            }),
            non_admin,
        );
        let err = svc.create_binding(request).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn create_binding_then_list_roundtrips() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .create_principal(PrincipalType::Agent, "a1", None, None)
            .unwrap();
        let ctx = admin_ctx(&store);
        let signer = TokenSigner::new(b"secret".to_vec());
        let svc = AdminServiceImpl::new(store, signer);

        let request = with_ctx(
            Request::new(pb::CreateBindingRequest {
                frontend: "matrix".to_string(),
                channel_id: "!room".to_string(),
                agent_id: agent.id.clone(),
            }),
            ctx.clone(),
        );
        svc.create_binding(request).await.unwrap();

        let list_request = with_ctx(Request::new(pb::ListBindingsRequest {}), ctx);
        let response = svc.list_bindings(list_request).await.unwrap();
        assert_eq!(response.into_inner().bindings.len(), 1);
    }

    #[tokio::test]
    async fn create_token_mints_a_verifiable_token() {
        let store = Store::open_in_memory().unwrap();
        let target = store
            .create_principal(PrincipalType::Client, "c1", None, None)
            .unwrap();
        let ctx = admin_ctx(&store);
        let signer = TokenSigner::new(b"secret".to_vec());
        let svc = AdminServiceImpl::new(store, signer.clone());

        let request = with_ctx(
            Request::new(pb::CreateTokenRequest {
                principal_id: target.id.clone(),
                ttl_seconds: 3600,
            }),
            ctx,
        );
        let response = svc.create_token(request).await.unwrap().into_inner();
        assert_eq!(signer.verify(&response.token).unwrap(), target.id);
    }
}
