// ABOUTME: ClientService — principal self-info, ledger replay, and the direct client-to-agent
// ABOUTME: send convenience, where conversation_key is the agent_id for this path.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::auth::context::AuthContext;
use crate::broker::Broker;
use crate::error::GatewayError;
use crate::manager::AgentManager;
use crate::pb;
use crate::store::{Cursor, Direction, GetEventsParams, Store};

pub struct ClientServiceImpl {
    store: Store,
    manager: Arc<AgentManager>,
    broker: Arc<Broker>,
}

impl ClientServiceImpl {
    pub fn new(store: Store, manager: Arc<AgentManager>, broker: Arc<Broker>) -> Self {
        Self { store, manager, broker }
    }

    fn auth_ctx<T>(request: &Request<T>) -> Result<AuthContext, Status> {
        request
            .extensions()
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| Status::unauthenticated("missing auth context"))
    }
}

#[tonic::async_trait]
impl pb::client_service_server::ClientService for ClientServiceImpl {
    async fn get_me(
        &self,
        request: Request<pb::GetMeRequest>,
    ) -> Result<Response<pb::MeResponse>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        let principal = self.store.get_principal(&ctx.principal_id).map_err(Status::from)?;
        Ok(Response::new(pb::MeResponse {
            principal_id: principal.id,
            principal_type: principal.principal_type.as_str().to_string(),
            display_name: principal.display_name,
            status: principal.status.as_str().to_string(),
            roles: ctx.roles,
        }))
    }

    async fn get_events(
        &self,
        request: Request<pb::GetEventsRequest>,
    ) -> Result<Response<pb::GetEventsResponse>, Status> {
        Self::auth_ctx(&request)?;
        let req = request.into_inner();

        let cursor = req
            .cursor
            .map(|c| Cursor::decode(&c))
            .transpose()
            .map_err(Status::from)?;

        let page = self
            .store
            .get_events(GetEventsParams {
                conversation_key: req.conversation_key.clone(),
                cursor,
                limit: req.limit.map(|l| l as i64),
            })
            .map_err(Status::from)?;

        let events = page
            .events
            .into_iter()
            .map(|e| pb::EventInfo {
                id: e.id,
                conversation_key: e.conversation_key,
                thread_id: e.thread_id,
                direction: e.direction.as_str().to_string(),
                author: e.author,
                timestamp: e.timestamp.to_rfc3339(),
                event_type: e.event_type.as_str().to_string(),
                text: e.text,
            })
            .collect();

        Ok(Response::new(pb::GetEventsResponse {
            events,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
        }))
    }

    /// Direct client-to-agent send: `conversation_key = agent_id`, bypassing the
    /// frontend/channel binding lookup the HTTP send path uses. The inbound
    /// ledger event is written before the request id is allocated, matching
    /// `Broker::accept`'s ordering.
    async fn send_message(
        &self,
        request: Request<pb::ClientSendMessageRequest>,
    ) -> Result<Response<pb::ClientSendMessageResponse>, Status> {
        let ctx = Self::auth_ctx(&request)?;
        let req = request.into_inner();

        if !self.manager.is_online(&req.conversation_key) {
            return Err(Status::from(GatewayError::AgentOffline));
        }

        self.store
            .save_event(
                &req.conversation_key,
                None,
                Direction::InboundToAgent,
                &ctx.principal_id,
                crate::store::EventType::Text,
                Some(&req.content),
                None,
                None,
                Some(&ctx.principal_id),
                None,
            )
            .map_err(Status::from)?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let mut relay_rx = self
            .manager
            .send_message(&req.conversation_key, request_id.clone(), req.content, None)
            .await
            .map_err(Status::from)?;

        // This path has no SSE consumer draining `relay_rx`, so the broker's
        // usual relay loop (see http/send.rs) runs here instead: drain frames
        // to the ledger until a terminal one, then release the pending slot.
        let broker = Arc::clone(&self.broker);
        let agent_id = req.conversation_key.clone();
        let drain_request_id = request_id.clone();
        tokio::spawn(async move {
            while let Some(response) = relay_rx.recv().await {
                match broker.persist_and_relay(&agent_id, None, &agent_id, response) {
                    Ok((_, terminal)) => {
                        if terminal {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to persist relayed event for direct send");
                        break;
                    }
                }
            }
            broker.close_request(&agent_id, &drain_request_id);
        });

        Ok(Response::new(pb::ClientSendMessageResponse {
            status: "accepted".to_string(),
            message_id: request_id,
        }))
    }
}
