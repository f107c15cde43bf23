// ABOUTME: End-to-end tests for the send path across Store, AgentManager, Router, and Broker.
// ABOUTME: Exercises accept -> dispatch -> agent response -> ledger persistence without the wire.

use std::sync::Arc;
use std::time::Duration;

use coven_gateway::broker::{AcceptOutcome, Broker};
use coven_gateway::config::HeartbeatConfig;
use coven_gateway::dedupe::DedupeCache;
use coven_gateway::manager::AgentManager;
use coven_gateway::pb;
use coven_gateway::router::Router;
use coven_gateway::store::principals::PrincipalType;
use coven_gateway::store::Store;

fn test_manager() -> Arc<AgentManager> {
    AgentManager::new(
        HeartbeatConfig {
            interval_secs: 30,
            timeout_secs: 90,
            reconnect_grace_secs: 60,
        },
        16,
    )
}

async fn register_agent(store: &Store, manager: &AgentManager, agent_id: &str) -> Arc<coven_gateway::manager::connection::Connection> {
    let (tx, _rx) = tokio::sync::mpsc::channel(16);
    manager
        .register(
            store,
            pb::RegisterAgent {
                agent_id: agent_id.to_string(),
                name: "test-agent".to_string(),
                capabilities: vec![],
                metadata: None,
            },
            tx,
        )
        .await
        .expect("registration should succeed for an existing agent principal")
}

#[tokio::test]
async fn accept_routes_to_online_agent_and_records_inbound_event() {
    let store = Store::open_in_memory().unwrap();
    let agent = store
        .create_principal(PrincipalType::Agent, "agent-one", None, None)
        .unwrap();
    store
        .create_binding("matrix", "!room:ex.org", &agent.id, None)
        .unwrap();

    let manager = test_manager();
    register_agent(&store, &manager, &agent.id).await;
    assert!(manager.is_online(&agent.id));

    let router = Router::new(store.clone(), Arc::clone(&manager));
    let dedupe = DedupeCache::new(Duration::from_secs(300));
    let broker = Broker::new(
        store.clone(),
        Arc::clone(&manager),
        router,
        dedupe,
        Duration::from_secs(30),
    );

    let outcome = broker
        .accept("matrix", "!room:ex.org", "alice", "hello", None, None)
        .await
        .unwrap();

    let (request_id, agent_id, mut relay_rx) = match outcome {
        AcceptOutcome::Streaming { request_id, agent_id, relay_rx } => (request_id, agent_id, relay_rx),
        AcceptOutcome::AlreadyAccepted => panic!("first send should not be deduped"),
    };
    assert_eq!(agent_id, agent.id);
    assert!(!request_id.is_empty());

    manager.handle_response(
        &agent_id,
        pb::MessageResponse {
            request_id: request_id.clone(),
            event: Some(pb::message_response::Event::Done(pb::Done {
                full_response: "hi there".to_string(),
            })),
        },
    );

    let response = relay_rx.recv().await.expect("agent response should arrive");
    let conversation_key = Broker::conversation_key("matrix", "!room:ex.org");
    let (frame, terminal) = broker
        .persist_and_relay(&conversation_key, None, &agent_id, response)
        .unwrap();
    assert!(terminal);
    assert_eq!(frame.event_name(), "done");

    let page = store
        .get_events(coven_gateway::store::GetEventsParams {
            conversation_key,
            cursor: None,
            limit: Some(10),
        })
        .unwrap();
    assert_eq!(page.events.len(), 2);
    assert_eq!(page.events[0].direction, coven_gateway::store::Direction::InboundToAgent);
    assert_eq!(page.events[1].direction, coven_gateway::store::Direction::OutboundFromAgent);
}

#[tokio::test]
async fn accept_with_unbound_channel_is_no_route() {
    let store = Store::open_in_memory().unwrap();
    let manager = test_manager();
    let router = Router::new(store.clone(), Arc::clone(&manager));
    let dedupe = DedupeCache::new(Duration::from_secs(300));
    let broker = Broker::new(store, Arc::clone(&manager), router, dedupe, Duration::from_secs(30));

    let err = broker
        .accept("slack", "C-unbound", "bob", "hello", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, coven_gateway::error::GatewayError::NoRoute));
}

#[tokio::test]
async fn duplicate_send_within_ttl_short_circuits() {
    let store = Store::open_in_memory().unwrap();
    let agent = store
        .create_principal(PrincipalType::Agent, "agent-two", None, None)
        .unwrap();
    store
        .create_binding("matrix", "!dup:ex.org", &agent.id, None)
        .unwrap();

    let manager = test_manager();
    register_agent(&store, &manager, &agent.id).await;

    let router = Router::new(store.clone(), Arc::clone(&manager));
    let dedupe = DedupeCache::new(Duration::from_secs(300));
    let broker = Broker::new(store, Arc::clone(&manager), router, dedupe, Duration::from_secs(30));

    let first = broker
        .accept("matrix", "!dup:ex.org", "alice", "same content", None, None)
        .await
        .unwrap();
    assert!(matches!(first, AcceptOutcome::Streaming { .. }));

    let second = broker
        .accept("matrix", "!dup:ex.org", "alice", "same content", None, None)
        .await
        .unwrap();
    assert!(matches!(second, AcceptOutcome::AlreadyAccepted));
}
