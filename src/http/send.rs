// ABOUTME: POST /api/send — the HTTP half of the send path. Runs Broker::accept for the
// ABOUTME: dedupe/route/persist/dispatch steps, then relays the agent's response stream back
// ABOUTME: as SSE, persisting each frame, until a terminal frame, timeout, or client disconnect.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::AppState;
use crate::auth::context::AuthContext;
use crate::broker::{AcceptOutcome, Broker, RelayFrame};
use crate::error::GatewayError;
use crate::pb;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub frontend: String,
    pub channel_id: String,
    pub sender: String,
    pub content: String,
    pub thread_id: Option<String>,
}

pub async fn send_message(
    State(state): State<AppState>,
    auth: axum::extract::Extension<Option<AuthContext>>,
    Json(body): Json<SendRequest>,
) -> Response {
    if body.frontend.trim().is_empty()
        || body.channel_id.trim().is_empty()
        || body.sender.trim().is_empty()
        || body.content.trim().is_empty()
    {
        return GatewayError::Invalid("frontend, channel_id, sender, and content are required".to_string())
            .into_response();
    }

    let actor_principal_id = auth.0.as_ref().map(|ctx| ctx.principal_id.clone());

    let outcome = state
        .broker
        .accept(
            &body.frontend,
            &body.channel_id,
            &body.sender,
            &body.content,
            body.thread_id.as_deref(),
            actor_principal_id.as_deref(),
        )
        .await;

    let (request_id, agent_id, relay_rx) = match outcome {
        Ok(AcceptOutcome::AlreadyAccepted) => {
            return Json(json!({ "status": "already_accepted" })).into_response();
        }
        Ok(AcceptOutcome::Streaming { request_id, agent_id, relay_rx }) => {
            (request_id, agent_id, relay_rx)
        }
        Err(err) => return err.into_response(),
    };

    let conversation_key = Broker::conversation_key(&body.frontend, &body.channel_id);
    let deadline = Instant::now() + state.broker.request_timeout();

    let relay_state = RelayState {
        relay_rx,
        broker: Arc::clone(&state.broker),
        conversation_key,
        thread_id: body.thread_id,
        agent_id: agent_id.clone(),
        deadline,
        done: false,
        _guard: RelayGuard {
            broker: Arc::clone(&state.broker),
            agent_id,
            request_id,
        },
    };

    metrics::gauge!("coven_sse_streams_open").increment(1.0);
    metrics::counter!("coven_sse_streams_opened_total").increment(1);
    let stream = stream::unfold(relay_state, next_frame);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

struct RelayGuard {
    broker: Arc<Broker>,
    agent_id: String,
    request_id: String,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        self.broker.close_request(&self.agent_id, &self.request_id);
        metrics::gauge!("coven_sse_streams_open").decrement(1.0);
        metrics::counter!("coven_sse_streams_closed_total").increment(1);
    }
}

struct RelayState {
    relay_rx: mpsc::Receiver<pb::MessageResponse>,
    broker: Arc<Broker>,
    conversation_key: String,
    thread_id: Option<String>,
    agent_id: String,
    deadline: Instant,
    done: bool,
    _guard: RelayGuard,
}

fn frame_to_event(frame: &RelayFrame) -> Event {
    Event::default().event(frame.event_name()).json_data(frame.data_json()).unwrap_or_else(|_| {
        Event::default().event("error").data("{\"error\":\"failed to encode event\"}")
    })
}

async fn next_frame(mut state: RelayState) -> Option<(Result<Event, Infallible>, RelayState)> {
    if state.done {
        return None;
    }

    tokio::select! {
        response = state.relay_rx.recv() => {
            match response {
                Some(response) => match state.broker.persist_and_relay(
                    &state.conversation_key,
                    state.thread_id.as_deref(),
                    &state.agent_id,
                    response,
                ) {
                    Ok((frame, terminal)) => {
                        state.done = terminal;
                        let event = frame_to_event(&frame);
                        Some((Ok(event), state))
                    }
                    Err(err) => {
                        state.done = true;
                        tracing::error!(error = %err, "failed to persist relayed event");
                        Some((Ok(frame_to_event(&RelayFrame::Error(err.public_message()))), state))
                    }
                },
                None => {
                    state.done = true;
                    match state.broker.persist_synthetic_error(
                        &state.conversation_key,
                        state.thread_id.as_deref(),
                        &state.agent_id,
                        "agent connection closed before completion",
                    ) {
                        Ok(frame) => Some((Ok(frame_to_event(&frame)), state)),
                        Err(_) => None,
                    }
                }
            }
        }
        _ = tokio::time::sleep_until(state.deadline) => {
            state.done = true;
            match state.broker.persist_synthetic_error(
                &state.conversation_key,
                state.thread_id.as_deref(),
                &state.agent_id,
                "request timed out waiting for the agent",
            ) {
                Ok(frame) => Some((Ok(frame_to_event(&frame)), state)),
                Err(_) => None,
            }
        }
    }
}
