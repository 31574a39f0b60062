use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dto::ws::ServerMessage,
    state::{StateListener, race::RaceState},
};

#[derive(Clone)]
/// Handle used to push messages to a connected client.
pub struct ClientSession {
    /// Identifier assigned when the socket connected.
    pub id: Uuid,
    /// Outbound queue drained by the socket's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Registry of connected clients keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    clients: DashMap<Uuid, ClientSession>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection.
    pub fn register(&self, session: ClientSession) {
        self.clients.insert(session.id, session);
    }

    /// Forget a connection. Returns `false` when it was not registered.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.clients.remove(id).is_some()
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is connected.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send the full state to a single client.
    pub fn send_state(&self, id: &Uuid, state: &RaceState) -> bool {
        let Some(message) = encode_state(state) else {
            return false;
        };
        let Some(session) = self.clients.get(id) else {
            return false;
        };
        session.tx.send(message).is_ok()
    }

    /// Send the full state to every client, returning how many queues accepted it.
    ///
    /// A closed queue means the socket is going away; its handler unregisters it.
    pub fn broadcast_state(&self, state: &RaceState) -> usize {
        let Some(message) = encode_state(state) else {
            return 0;
        };

        let mut delivered = 0;
        for session in self.clients.iter() {
            if session.tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(session_id = %session.id, "skipping closed client queue");
            }
        }
        delivered
    }
}

impl StateListener for SessionRegistry {
    fn state_changed(&self, state: &Arc<RaceState>) {
        let delivered = self.broadcast_state(state);
        debug!(delivered, "broadcast state snapshot");
    }
}

/// Serialize the snapshot once so every client shares the same frame.
fn encode_state(state: &RaceState) -> Option<Message> {
    match serde_json::to_string(&ServerMessage::State(state)) {
        Ok(payload) => Some(Message::Text(payload.into())),
        Err(err) => {
            warn!(error = %err, "failed to serialize state snapshot");
            None
        }
    }
}
