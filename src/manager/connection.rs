// ABOUTME: A single agent's live stream — outbound frame sender plus the pending-request map.
// ABOUTME: One mutex guards `pending`; never acquired while holding the registry's map mutex.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::mpsc;
use tonic::Status;

use crate::pb;

pub struct Connection {
    pub agent_id: String,
    pub instance_id: String,
    pub name: String,
    pub capabilities: Vec<String>,
    tx: mpsc::Sender<Result<pb::ServerMessage, Status>>,
    pending: Mutex<HashMap<String, mpsc::Sender<pb::MessageResponse>>>,
    last_heartbeat_at: Mutex<Instant>,
    dead_since: Mutex<Option<Instant>>,
}

impl Connection {
    pub fn new(
        agent_id: String,
        instance_id: String,
        name: String,
        capabilities: Vec<String>,
        tx: mpsc::Sender<Result<pb::ServerMessage, Status>>,
    ) -> Self {
        Self {
            agent_id,
            instance_id,
            name,
            capabilities,
            tx,
            pending: Mutex::new(HashMap::new()),
            last_heartbeat_at: Mutex::new(Instant::now()),
            dead_since: Mutex::new(None),
        }
    }

    pub async fn send_server_message(&self, msg: pb::ServerMessage) -> Result<(), ()> {
        self.tx.send(Ok(msg)).await.map_err(|_| ())
    }

    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat_at.lock().unwrap() = Instant::now();
        *self.dead_since.lock().unwrap() = None;
    }

    pub fn seconds_since_heartbeat(&self) -> u64 {
        self.last_heartbeat_at.lock().unwrap().elapsed().as_secs()
    }

    /// Marks the connection as dead-as-of-now if not already marked. Returns
    /// the duration it has been dead for, used to decide when the reconnect
    /// grace period has elapsed.
    pub fn mark_dead_and_duration(&self) -> std::time::Duration {
        let mut dead_since = self.dead_since.lock().unwrap();
        let since = *dead_since.get_or_insert_with(Instant::now);
        since.elapsed()
    }

    pub fn register_pending(
        &self,
        request_id: String,
        capacity: usize,
    ) -> mpsc::Receiver<pb::MessageResponse> {
        let (tx, rx) = mpsc::channel(capacity);
        self.pending.lock().unwrap().insert(request_id, tx);
        rx
    }

    /// Non-blocking dispatch into the pending channel for `request_id`. Drops
    /// with a warning if the channel is full or unknown — at-most-once
    /// delivery per frame.
    pub fn dispatch_response(&self, response: pb::MessageResponse) {
        let pending = self.pending.lock().unwrap();
        let Some(sender) = pending.get(&response.request_id) else {
            tracing::warn!(
                agent_id = %self.agent_id,
                request_id = %response.request_id,
                "response for unknown request id, discarding"
            );
            return;
        };
        if let Err(e) = sender.try_send(response) {
            tracing::warn!(
                agent_id = %self.agent_id,
                error = %e,
                "pending channel full or closed, dropping response frame"
            );
        }
    }

    /// Idempotent: removing an absent request id is a no-op.
    pub fn close_request(&self, request_id: &str) {
        self.pending.lock().unwrap().remove(request_id);
    }

    /// Sends a synthetic `error` frame carrying `reason` to every pending
    /// request before clearing the map, so the receiving broker's relay loop
    /// sees a normal terminal frame (and can surface the reason) instead of a
    /// bare channel closure it has to guess about.
    pub fn teardown(&self, reason: &str) {
        let mut pending = self.pending.lock().unwrap();
        for (request_id, sender) in pending.drain() {
            let _ = sender.try_send(pb::MessageResponse {
                request_id,
                event: Some(pb::message_response::Event::Error(reason.to_string())),
            });
        }
    }
}
