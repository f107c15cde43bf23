// ABOUTME: The bidirectional AgentStream RPC — registration, heartbeat, and response demux.
// ABOUTME: First client frame must be RegisterAgent or the stream is rejected.

use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::auth::AuthContext;
use crate::manager::AgentManager;
use crate::pb;
use crate::store::Store;

pub struct CovenControlImpl {
    store: Store,
    manager: Arc<AgentManager>,
}

impl CovenControlImpl {
    pub fn new(store: Store, manager: Arc<AgentManager>) -> Self {
        Self { store, manager }
    }
}

type AgentStreamStream = Pin<Box<dyn futures_util::Stream<Item = Result<pb::ServerMessage, Status>> + Send>>;

#[tonic::async_trait]
impl pb::coven_control_server::CovenControl for CovenControlImpl {
    type AgentStreamStream = AgentStreamStream;

    async fn agent_stream(
        &self,
        request: Request<Streaming<pb::AgentMessage>>,
    ) -> Result<Response<Self::AgentStreamStream>, Status> {
        let auth_ctx = request
            .extensions()
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| Status::unauthenticated("missing auth context"))?;

        let mut incoming = request.into_inner();

        let first = incoming
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("stream closed before registration"))?;
        let register = match first.payload {
            Some(pb::agent_message::Payload::Register(r)) => r,
            _ => return Err(Status::invalid_argument("first frame must be RegisterAgent")),
        };

        if register.agent_id != auth_ctx.principal_id {
            return Err(Status::permission_denied(
                "agent_id must match the authenticated principal",
            ));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(32);
        let connection = self
            .manager
            .register(&self.store, register, tx)
            .await
            .map_err(Status::from)?;

        let manager = Arc::clone(&self.manager);
        let agent_id = connection.agent_id.clone();
        let instance_id = connection.instance_id.clone();

        tokio::spawn(async move {
            loop {
                match incoming.message().await {
                    Ok(Some(frame)) => match frame.payload {
                        Some(pb::agent_message::Payload::Heartbeat(_)) => {
                            manager.touch_heartbeat(&agent_id);
                        }
                        Some(pb::agent_message::Payload::Response(response)) => {
                            manager.handle_response(&agent_id, response);
                        }
                        Some(pb::agent_message::Payload::Register(_)) => {
                            tracing::warn!(
                                agent_id = %agent_id,
                                "duplicate RegisterAgent frame ignored"
                            );
                        }
                        None => {}
                    },
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(agent_id = %agent_id, error = %err, "agent stream recv error");
                        break;
                    }
                }
            }
            manager.teardown(&agent_id, &instance_id, "agent stream closed");
            tracing::info!(agent_id = %agent_id, "agent receive loop ended");
        });

        let out: Self::AgentStreamStream = Box::pin(ReceiverStream::new(rx));
        Ok(Response::new(out))
    }
}
