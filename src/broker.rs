// ABOUTME: The send path — one unit of work per inbound frontend message.
// ABOUTME: Allocates a request id, delivers to the agent, and fans the response stream to the
// ABOUTME: ledger and to whichever consumer (HTTP SSE, gRPC client stream) drained it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::dedupe::DedupeCache;
use crate::error::{GatewayError, Result};
use crate::manager::AgentManager;
use crate::pb;
use crate::router::Router;
use crate::store::{Direction, EventType, Store};

/// One SSE-equivalent frame relayed from the agent to whichever frontend is
/// consuming a request. Produced from a `pb::MessageResponse` by `relay`.
#[derive(Debug, Clone)]
pub enum RelayFrame {
    Thinking(String),
    Text(String),
    ToolUse { id: String, name: String, input_json: String },
    ToolResult { id: String, output: String, is_error: bool },
    File { name: String, path: String, mime_type: String },
    Done { full_response: String },
    Error(String),
}

impl RelayFrame {
    /// SSE event name used on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            RelayFrame::Thinking(_) => "thinking",
            RelayFrame::Text(_) => "text",
            RelayFrame::ToolUse { .. } => "tool_use",
            RelayFrame::ToolResult { .. } => "tool_result",
            RelayFrame::File { .. } => "file",
            RelayFrame::Done { .. } => "done",
            RelayFrame::Error(_) => "error",
        }
    }

    /// JSON data payload for the SSE line.
    pub fn data_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            RelayFrame::Thinking(text) => json!({ "text": text }),
            RelayFrame::Text(text) => json!({ "text": text }),
            RelayFrame::ToolUse { id, name, input_json } => {
                json!({ "tool_id": id, "tool_name": name, "input": input_json })
            }
            RelayFrame::ToolResult { id, output, is_error } => {
                json!({ "tool_id": id, "output": output, "is_error": is_error })
            }
            RelayFrame::File { name, path, mime_type } => {
                json!({ "name": name, "path": path, "mime_type": mime_type })
            }
            RelayFrame::Done { full_response } => json!({ "full_response": full_response }),
            RelayFrame::Error(msg) => json!({ "error": msg }),
        }
    }

    fn from_pb(event: pb::message_response::Event) -> Self {
        match event {
            pb::message_response::Event::Thinking(t) => RelayFrame::Thinking(t),
            pb::message_response::Event::Text(t) => RelayFrame::Text(t),
            pb::message_response::Event::ToolUse(tu) => RelayFrame::ToolUse {
                id: tu.id,
                name: tu.name,
                input_json: tu.input_json,
            },
            pb::message_response::Event::ToolResult(tr) => RelayFrame::ToolResult {
                id: tr.id,
                output: tr.output,
                is_error: tr.is_error,
            },
            pb::message_response::Event::File(f) => RelayFrame::File {
                name: f.name,
                path: f.path,
                mime_type: f.mime_type,
            },
            pb::message_response::Event::Done(d) => RelayFrame::Done {
                full_response: d.full_response,
            },
            pb::message_response::Event::Error(e) => RelayFrame::Error(e),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, RelayFrame::Done { .. } | RelayFrame::Error(_))
    }

    fn event_type(&self) -> EventType {
        match self {
            RelayFrame::Thinking(_) => EventType::Thinking,
            RelayFrame::Text(_) => EventType::Text,
            RelayFrame::ToolUse { .. } => EventType::ToolUse,
            RelayFrame::ToolResult { .. } => EventType::ToolResult,
            RelayFrame::File { .. } => EventType::File,
            RelayFrame::Done { .. } => EventType::Text,
            RelayFrame::Error(_) => EventType::Error,
        }
    }

    fn ledger_text(&self) -> Option<String> {
        match self {
            RelayFrame::Thinking(t) | RelayFrame::Text(t) => Some(t.clone()),
            RelayFrame::Done { full_response } => Some(full_response.clone()),
            RelayFrame::Error(e) => Some(e.clone()),
            RelayFrame::ToolUse { name, .. } => Some(name.clone()),
            RelayFrame::ToolResult { output, .. } => Some(output.clone()),
            RelayFrame::File { name, .. } => Some(name.clone()),
        }
    }
}

pub struct Broker {
    store: Store,
    manager: Arc<AgentManager>,
    router: Router,
    dedupe: DedupeCache,
    request_timeout: Duration,
}

/// What the caller should do after `Broker::accept` returns: either stream
/// frames from `relay_rx` (a normal send), or short-circuit because the
/// content was already accepted within the dedupe TTL.
pub enum AcceptOutcome {
    AlreadyAccepted,
    Streaming {
        request_id: String,
        agent_id: String,
        relay_rx: mpsc::Receiver<pb::MessageResponse>,
    },
}

impl Broker {
    pub fn new(
        store: Store,
        manager: Arc<AgentManager>,
        router: Router,
        dedupe: DedupeCache,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            manager,
            router,
            dedupe,
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Dedupe, route, persist the inbound event, allocate a request id, and
    /// hand off to the agent. The caller (HTTP handler or gRPC handler) owns
    /// the relay loop since its transport differs.
    pub async fn accept(
        &self,
        frontend: &str,
        channel_id: &str,
        sender: &str,
        content: &str,
        thread_id: Option<&str>,
        actor_principal_id: Option<&str>,
    ) -> Result<AcceptOutcome> {
        let conversation_key = format!("{frontend}:{channel_id}");

        let dedupe_key = DedupeCache::key(frontend, channel_id, content);
        if self.dedupe.check_and_insert(&dedupe_key) {
            return Ok(AcceptOutcome::AlreadyAccepted);
        }

        let agent_id = match self.router.route(frontend, channel_id) {
            Ok(id) => id,
            Err(err @ (GatewayError::NoRoute | GatewayError::AgentOffline)) => return Err(err),
            Err(err) => return Err(err),
        };

        self.store.save_event(
            &conversation_key,
            thread_id,
            Direction::InboundToAgent,
            sender,
            EventType::Text,
            Some(content),
            Some(frontend),
            None,
            actor_principal_id,
            None,
        )?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let relay_rx = match self
            .manager
            .send_message(&agent_id, request_id.clone(), content.to_string(), thread_id.map(str::to_string))
            .await
        {
            Ok(rx) => rx,
            Err(err) => {
                self.store.save_event(
                    &conversation_key,
                    thread_id,
                    Direction::OutboundFromAgent,
                    &agent_id,
                    EventType::Error,
                    Some(&err.public_message()),
                    None,
                    None,
                    None,
                    None,
                )?;
                return Err(err);
            }
        };

        Ok(AcceptOutcome::Streaming {
            request_id,
            agent_id,
            relay_rx,
        })
    }

    /// Drains one frame off the agent's response channel, turning it into a
    /// `RelayFrame` and persisting the corresponding outbound ledger event.
    /// Returns `None` once the frame was terminal (`done` / `error`) — the
    /// caller must not poll again after that.
    pub fn persist_and_relay(
        &self,
        conversation_key: &str,
        thread_id: Option<&str>,
        agent_id: &str,
        response: pb::MessageResponse,
    ) -> Result<(RelayFrame, bool)> {
        let frame = match response.event {
            Some(event) => RelayFrame::from_pb(event),
            None => RelayFrame::Error("empty response frame".to_string()),
        };

        self.store.save_event(
            conversation_key,
            thread_id,
            Direction::OutboundFromAgent,
            agent_id,
            frame.event_type(),
            frame.ledger_text().as_deref(),
            None,
            None,
            None,
            None,
        )?;

        let terminal = frame.is_terminal();
        Ok((frame, terminal))
    }

    /// Synthesizes the `error` frame for a timeout or client-disconnect
    /// termination and persists it as one of the request's terminal states.
    pub fn persist_synthetic_error(
        &self,
        conversation_key: &str,
        thread_id: Option<&str>,
        agent_id: &str,
        reason: &str,
    ) -> Result<RelayFrame> {
        self.store.save_event(
            conversation_key,
            thread_id,
            Direction::OutboundFromAgent,
            agent_id,
            EventType::Error,
            Some(reason),
            None,
            None,
            None,
            None,
        )?;
        Ok(RelayFrame::Error(reason.to_string()))
    }

    /// Idempotent close of the per-request pending channel.
    pub fn close_request(&self, agent_id: &str, request_id: &str) {
        self.manager.close_request(agent_id, request_id);
    }

    pub fn conversation_key(frontend: &str, channel_id: &str) -> String {
        format!("{frontend}:{channel_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;
    use crate::store::PrincipalType;
    use tokio::sync::mpsc as tmpsc;

    fn heartbeat_config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval_secs: 30,
            timeout_secs: 90,
            reconnect_grace_secs: 60,
        }
    }

    async fn broker_with_online_agent() -> (Broker, Store, String, tmpsc::Receiver<Result<pb::ServerMessage, tonic::Status>>) {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .create_principal(PrincipalType::Agent, "a1", None, None)
            .unwrap();
        store
            .create_binding("matrix", "!room:ex.org", &agent.id, None)
            .unwrap();
        let manager = AgentManager::new(heartbeat_config(), 16);
        let (tx, agent_rx) = tmpsc::channel(8);
        manager
            .register(
                &store,
                pb::RegisterAgent {
                    agent_id: agent.id.clone(),
                    name: "a1".to_string(),
                    capabilities: vec![],
                    metadata: None,
                },
                tx,
            )
            .await
            .unwrap();

        let router = Router::new(store.clone(), Arc::clone(&manager));
        let dedupe = DedupeCache::new(Duration::from_secs(300));
        let broker = Broker::new(store.clone(), manager, router, dedupe, Duration::from_secs(60));
        (broker, store, agent.id, agent_rx)
    }

    #[tokio::test]
    async fn accept_with_no_binding_is_no_route() {
        let store = Store::open_in_memory().unwrap();
        let manager = AgentManager::new(heartbeat_config(), 16);
        let router = Router::new(store.clone(), Arc::clone(&manager));
        let dedupe = DedupeCache::new(Duration::from_secs(300));
        let broker = Broker::new(store, manager, router, dedupe, Duration::from_secs(60));

        let err = broker
            .accept("matrix", "!unknown:ex.org", "alice", "hi", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoRoute));
    }

    #[tokio::test]
    async fn accept_persists_inbound_and_streams() {
        let (broker, store, _agent_id, mut agent_rx) = broker_with_online_agent().await;
        let _ = agent_rx.recv().await; // Welcome

        let outcome = broker
            .accept("matrix", "!room:ex.org", "alice", "hi", None, None)
            .await
            .unwrap();
        let _ = agent_rx.recv().await; // SendMessage frame

        match outcome {
            AcceptOutcome::Streaming { .. } => {}
            AcceptOutcome::AlreadyAccepted => panic!("expected streaming outcome"),
        }

        let page = store
            .get_events(crate::store::GetEventsParams {
                conversation_key: "matrix:!room:ex.org".to_string(),
                cursor: None,
                limit: None,
            })
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].author, "alice");
        assert!(matches!(page.events[0].direction, Direction::InboundToAgent));
    }

    #[tokio::test]
    async fn duplicate_send_within_ttl_is_already_accepted() {
        let (broker, _store, _agent_id, mut agent_rx) = broker_with_online_agent().await;
        let _ = agent_rx.recv().await; // Welcome

        let first = broker
            .accept("matrix", "!room:ex.org", "alice", "hi", None, None)
            .await
            .unwrap();
        let _ = agent_rx.recv().await; // SendMessage
        assert!(matches!(first, AcceptOutcome::Streaming { .. }));

        let second = broker
            .accept("matrix", "!room:ex.org", "alice", "hi", None, None)
            .await
            .unwrap();
        assert!(matches!(second, AcceptOutcome::AlreadyAccepted));
    }

    #[tokio::test]
    async fn persist_and_relay_marks_done_as_terminal() {
        let (broker, _store, agent_id, mut agent_rx) = broker_with_online_agent().await;
        let _ = agent_rx.recv().await; // Welcome

        let (frame, terminal) = broker
            .persist_and_relay(
                "matrix:!room:ex.org",
                None,
                &agent_id,
                pb::MessageResponse {
                    request_id: "req-1".to_string(),
                    event: Some(pb::message_response::Event::Done(pb::Done {
                        full_response: "all done".to_string(),
                    })),
                },
            )
            .unwrap();
        assert!(terminal);
        assert_eq!(frame.event_name(), "done");
    }

    #[tokio::test]
    async fn persist_and_relay_text_is_not_terminal() {
        let (broker, _store, agent_id, mut agent_rx) = broker_with_online_agent().await;
        let _ = agent_rx.recv().await; // Welcome

        let (frame, terminal) = broker
            .persist_and_relay(
                "matrix:!room:ex.org",
                None,
                &agent_id,
                pb::MessageResponse {
                    request_id: "req-1".to_string(),
                    event: Some(pb::message_response::Event::Text("partial".to_string())),
                },
            )
            .unwrap();
        assert!(!terminal);
        assert_eq!(frame.event_name(), "text");
    }
}
