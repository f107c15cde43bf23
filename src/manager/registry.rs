// ABOUTME: The agent connection registry — register/evict, route-sends, heartbeat watchdog.
// ABOUTME: One mutex guards the agent_id -> Connection map; never nested inside a connection lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tonic::Status;

use super::connection::Connection;
use crate::config::HeartbeatConfig;
use crate::error::{GatewayError, Result};
use crate::pb;
use crate::store::{PrincipalType, Store};

pub struct AgentInfo {
    pub agent_id: String,
    pub name: String,
    pub capabilities: Vec<String>,
}

pub struct AgentManager {
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    heartbeat: HeartbeatConfig,
    pending_capacity: usize,
}

impl AgentManager {
    pub fn new(heartbeat: HeartbeatConfig, pending_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            heartbeat,
            pending_capacity,
        })
    }

    /// Validates the registering agent id against an existing `agent` principal,
    /// evicts any prior connection for the same agent, and welcomes the new one.
    pub async fn register(
        &self,
        store: &Store,
        reg: pb::RegisterAgent,
        tx: mpsc::Sender<Result<pb::ServerMessage, Status>>,
    ) -> Result<Arc<Connection>> {
        if reg.agent_id.is_empty() {
            return Err(GatewayError::Invalid("agent_id must not be empty".to_string()));
        }
        let principal = store.get_principal(&reg.agent_id)?;
        if principal.principal_type != PrincipalType::Agent {
            return Err(GatewayError::Invalid(
                "registering id does not belong to an agent principal".to_string(),
            ));
        }

        let instance_id = generate_instance_id();
        let connection = Arc::new(Connection::new(
            reg.agent_id.clone(),
            instance_id.clone(),
            reg.name.clone(),
            reg.capabilities.clone(),
            tx,
        ));

        let evicted = {
            let mut connections = self.connections.lock().unwrap();
            let evicted = connections.insert(reg.agent_id.clone(), Arc::clone(&connection));
            evicted
        };

        if let Some(old) = evicted {
            tracing::info!(agent_id = %reg.agent_id, old_instance = %old.instance_id, "evicting stale connection");
            let _ = old
                .send_server_message(pb::ServerMessage {
                    payload: Some(pb::server_message::Payload::Shutdown(pb::Shutdown {
                        reason: "superseded by new connection".to_string(),
                    })),
                })
                .await;
            old.teardown("agent reconnected");
            metrics::counter!("coven_agents_evicted_total").increment(1);
        }

        connection
            .send_server_message(pb::ServerMessage {
                payload: Some(pb::server_message::Payload::Welcome(pb::Welcome {
                    agent_id: reg.agent_id.clone(),
                    instance_id: instance_id.clone(),
                })),
            })
            .await
            .map_err(|_| GatewayError::internal("failed to send welcome frame"))?;

        tracing::info!(agent_id = %reg.agent_id, instance_id = %instance_id, "agent registered");
        metrics::counter!("coven_agents_registered_total").increment(1);

        Ok(connection)
    }

    pub fn is_online(&self, agent_id: &str) -> bool {
        self.connections.lock().unwrap().contains_key(agent_id)
    }

    pub fn list_online(&self) -> Vec<AgentInfo> {
        self.connections
            .lock()
            .unwrap()
            .values()
            .map(|c| AgentInfo {
                agent_id: c.agent_id.clone(),
                name: c.name.clone(),
                capabilities: c.capabilities.clone(),
            })
            .collect()
    }

    fn get_connection(&self, agent_id: &str) -> Option<Arc<Connection>> {
        self.connections.lock().unwrap().get(agent_id).cloned()
    }

    pub async fn send_message(
        &self,
        agent_id: &str,
        request_id: String,
        content: String,
        thread_id: Option<String>,
    ) -> Result<mpsc::Receiver<pb::MessageResponse>> {
        let connection = self.get_connection(agent_id).ok_or(GatewayError::AgentOffline)?;

        if connection.seconds_since_heartbeat() > self.heartbeat.timeout_secs {
            return Err(GatewayError::AgentOffline);
        }

        let rx = connection.register_pending(request_id.clone(), self.pending_capacity);

        let sent = connection
            .send_server_message(pb::ServerMessage {
                payload: Some(pb::server_message::Payload::SendMessage(pb::SendMessage {
                    request_id: request_id.clone(),
                    content,
                    thread_id,
                })),
            })
            .await;

        if sent.is_err() {
            connection.close_request(&request_id);
            return Err(GatewayError::AgentOffline);
        }

        Ok(rx)
    }

    pub fn close_request(&self, agent_id: &str, request_id: &str) {
        if let Some(connection) = self.get_connection(agent_id) {
            connection.close_request(request_id);
        }
    }

    pub fn touch_heartbeat(&self, agent_id: &str) {
        if let Some(connection) = self.get_connection(agent_id) {
            connection.touch_heartbeat();
        }
    }

    pub fn handle_response(&self, agent_id: &str, response: pb::MessageResponse) {
        if let Some(connection) = self.get_connection(agent_id) {
            connection.dispatch_response(response);
        }
    }

    /// Removes the connection only if `instance_id` still matches — a newer
    /// registration for the same agent must not be torn down by a stale
    /// receive loop's teardown call. `reason` is relayed to any in-flight
    /// requests as a synthetic `error` frame.
    pub fn teardown(&self, agent_id: &str, instance_id: &str, reason: &str) {
        let mut connections = self.connections.lock().unwrap();
        if let Some(existing) = connections.get(agent_id) {
            if existing.instance_id == instance_id {
                let removed = connections.remove(agent_id);
                drop(connections);
                if let Some(removed) = removed {
                    removed.teardown(reason);
                    tracing::info!(agent_id = %agent_id, instance_id = %instance_id, reason = %reason, "connection torn down");
                }
            }
        }
    }

    /// Spawns the periodic ping + liveness sweep: pings every connection each
    /// tick, and tears down any agent whose heartbeat has been stale for
    /// longer than the reconnect grace period. Runs for the process lifetime.
    pub fn spawn_heartbeat_watchdog(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.heartbeat.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.watchdog_tick().await;
            }
        })
    }

    async fn watchdog_tick(&self) {
        let snapshot: Vec<Arc<Connection>> =
            self.connections.lock().unwrap().values().cloned().collect();

        for connection in snapshot {
            let _ = connection
                .send_server_message(pb::ServerMessage {
                    payload: Some(pb::server_message::Payload::Ping(pb::Ping {})),
                })
                .await;

            if connection.seconds_since_heartbeat() > self.heartbeat.timeout_secs {
                let dead_for = connection.mark_dead_and_duration();
                if dead_for > Duration::from_secs(self.heartbeat.reconnect_grace_secs) {
                    tracing::warn!(
                        agent_id = %connection.agent_id,
                        "heartbeat timeout exceeded reconnect grace, tearing down"
                    );
                    self.teardown(
                        &connection.agent_id,
                        &connection.instance_id,
                        "agent heartbeat timeout exceeded",
                    );
                }
            }
        }
    }
}

fn generate_instance_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval_secs: 30,
            timeout_secs: 90,
            reconnect_grace_secs: 60,
        }
    }

    fn store_with_agent() -> (Store, String) {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .create_principal(PrincipalType::Agent, "a1", None, None)
            .unwrap();
        (store, agent.id)
    }

    #[tokio::test]
    async fn register_then_is_online() {
        let manager = AgentManager::new(config(), 16);
        let (store, agent_id) = store_with_agent();
        let (tx, _rx) = mpsc::channel(4);
        manager
            .register(
                &store,
                pb::RegisterAgent {
                    agent_id: agent_id.clone(),
                    name: "a1".to_string(),
                    capabilities: vec![],
                    metadata: None,
                },
                tx,
            )
            .await
            .unwrap();
        assert!(manager.is_online(&agent_id));
    }

    #[tokio::test]
    async fn register_rejects_empty_agent_id() {
        let manager = AgentManager::new(config(), 16);
        let (store, _agent_id) = store_with_agent();
        let (tx, _rx) = mpsc::channel(4);
        let err = manager
            .register(
                &store,
                pb::RegisterAgent {
                    agent_id: String::new(),
                    name: "a1".to_string(),
                    capabilities: vec![],
                    metadata: None,
                },
                tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(_)));
    }

    #[tokio::test]
    async fn register_rejects_non_agent_principal() {
        let manager = AgentManager::new(config(), 16);
        let store = Store::open_in_memory().unwrap();
        let client = store
            .create_principal(PrincipalType::Client, "c1", None, None)
            .unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let err = manager
            .register(
                &store,
                pb::RegisterAgent {
                    agent_id: client.id,
                    name: "c1".to_string(),
                    capabilities: vec![],
                    metadata: None,
                },
                tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Invalid(_)));
    }

    #[tokio::test]
    async fn second_registration_evicts_first() {
        let manager = AgentManager::new(config(), 16);
        let (store, agent_id) = store_with_agent();
        let (tx1, mut rx1) = mpsc::channel(4);
        manager
            .register(
                &store,
                pb::RegisterAgent {
                    agent_id: agent_id.clone(),
                    name: "a1".to_string(),
                    capabilities: vec![],
                    metadata: None,
                },
                tx1,
            )
            .await
            .unwrap();
        let _ = rx1.recv().await; // Welcome

        let (tx2, _rx2) = mpsc::channel(4);
        manager
            .register(
                &store,
                pb::RegisterAgent {
                    agent_id: agent_id.clone(),
                    name: "a1".to_string(),
                    capabilities: vec![],
                    metadata: None,
                },
                tx2,
            )
            .await
            .unwrap();

        let shutdown = rx1.recv().await.unwrap().unwrap();
        assert!(matches!(
            shutdown.payload,
            Some(pb::server_message::Payload::Shutdown(_))
        ));
    }

    #[tokio::test]
    async fn send_message_to_offline_agent_fails() {
        let manager = AgentManager::new(config(), 16);
        let err = manager
            .send_message("nonexistent", "req-1".to_string(), "hi".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AgentOffline));
    }

    #[tokio::test]
    async fn send_message_then_handle_response_delivers() {
        let manager = AgentManager::new(config(), 16);
        let (store, agent_id) = store_with_agent();
        let (tx, mut agent_rx) = mpsc::channel(4);
        manager
            .register(
                &store,
                pb::RegisterAgent {
                    agent_id: agent_id.clone(),
                    name: "a1".to_string(),
                    capabilities: vec![],
                    metadata: None,
                },
                tx,
            )
            .await
            .unwrap();
        let _ = agent_rx.recv().await; // Welcome

        let mut response_rx = manager
            .send_message(&agent_id, "req-1".to_string(), "hi".to_string(), None)
            .await
            .unwrap();
        let _ = agent_rx.recv().await; // SendMessage frame

        manager.handle_response(
            &agent_id,
            pb::MessageResponse {
                request_id: "req-1".to_string(),
                event: Some(pb::message_response::Event::Text("hello back".to_string())),
            },
        );

        let received = response_rx.recv().await.unwrap();
        assert_eq!(received.request_id, "req-1");
    }

    #[tokio::test]
    async fn teardown_with_stale_instance_is_noop() {
        let manager = AgentManager::new(config(), 16);
        let (store, agent_id) = store_with_agent();
        let (tx, _rx) = mpsc::channel(4);
        let conn = manager
            .register(
                &store,
                pb::RegisterAgent {
                    agent_id: agent_id.clone(),
                    name: "a1".to_string(),
                    capabilities: vec![],
                    metadata: None,
                },
                tx,
            )
            .await
            .unwrap();
        manager.teardown(&agent_id, "not-the-real-instance", "test teardown");
        assert!(manager.is_online(&agent_id));
        manager.teardown(&agent_id, &conn.instance_id, "test teardown");
        assert!(!manager.is_online(&agent_id));
    }
}
