// ABOUTME: Binding-based dispatch — resolves (frontend, channel_id) to an online agent id.
// ABOUTME: Stateless: every call re-reads the store and the live connection registry.

use crate::error::{GatewayError, Result};
use crate::manager::AgentManager;
use crate::store::Store;

pub struct Router {
    store: Store,
    manager: std::sync::Arc<AgentManager>,
}

impl Router {
    pub fn new(store: Store, manager: std::sync::Arc<AgentManager>) -> Self {
        Self { store, manager }
    }

    /// `NotFound` binding becomes `NoRoute`; an offline agent becomes `AgentOffline`.
    pub fn route(&self, frontend: &str, channel_id: &str) -> Result<String> {
        let result = self.route_inner(frontend, channel_id);
        match &result {
            Ok(_) => {
                metrics::counter!("coven_requests_routed_total").increment(1);
            }
            Err(err) => {
                metrics::counter!("coven_requests_routing_failed_total", "reason" => err.metric_reason())
                    .increment(1);
            }
        }
        result
    }

    fn route_inner(&self, frontend: &str, channel_id: &str) -> Result<String> {
        let binding = self
            .store
            .get_binding_by_channel(frontend, channel_id)
            .map_err(|err| match err {
                GatewayError::NotFound => GatewayError::NoRoute,
                other => other,
            })?;

        if !self.manager.is_online(&binding.agent_id) {
            return Err(GatewayError::AgentOffline);
        }

        Ok(binding.agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;
    use crate::store::PrincipalType;
    use tokio::sync::mpsc;

    fn heartbeat_config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval_secs: 30,
            timeout_secs: 90,
            reconnect_grace_secs: 60,
        }
    }

    #[test]
    fn route_with_no_binding_is_no_route() {
        let store = Store::open_in_memory().unwrap();
        let manager = AgentManager::new(heartbeat_config(), 16);
        let router = Router::new(store, manager);
        let err = router.route("matrix", "!unknown:ex.org").unwrap_err();
        assert!(matches!(err, GatewayError::NoRoute));
    }

    #[tokio::test]
    async fn route_with_offline_agent_is_agent_offline() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .create_principal(PrincipalType::Agent, "a1", None, None)
            .unwrap();
        store
            .create_binding("matrix", "!room:ex.org", &agent.id, None)
            .unwrap();
        let manager = AgentManager::new(heartbeat_config(), 16);
        let router = Router::new(store, manager);
        let err = router.route("matrix", "!room:ex.org").unwrap_err();
        assert!(matches!(err, GatewayError::AgentOffline));
    }

    #[tokio::test]
    async fn route_with_online_agent_returns_agent_id() {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .create_principal(PrincipalType::Agent, "a1", None, None)
            .unwrap();
        store
            .create_binding("matrix", "!room:ex.org", &agent.id, None)
            .unwrap();
        let manager = AgentManager::new(heartbeat_config(), 16);
        let (tx, _rx) = mpsc::channel(4);
        manager
            .register(
                &store,
                crate::pb::RegisterAgent {
                    agent_id: agent.id.clone(),
                    name: "a1".to_string(),
                    capabilities: vec![],
                    metadata: None,
                },
                tx,
            )
            .await
            .unwrap();

        let router = Router::new(store, manager);
        let routed = router.route("matrix", "!room:ex.org").unwrap();
        assert_eq!(routed, agent.id);
    }
}
