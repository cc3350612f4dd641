use std::collections::{HashMap, HashSet};
use std::fmt;

use log::{debug, info};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::Message as WsMessage;

use crate::error::HubError;
use crate::messages::ServerMessage;

/// Queue feeding a connection's socket writer.
pub type Outbound = mpsc::UnboundedSender<WsMessage>;

/// Opaque handle for one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

struct Connection {
    sender: Outbound,
    user_id: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    users: HashMap<String, HashSet<ConnectionId>>,
}

/// Identity and liveness of every open connection. A user may hold several
/// connections at once.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on_connect(&self, sender: Outbound) -> ConnectionId {
        let id = ConnectionId::new();
        let mut state = self.state.write().await;
        state.connections.insert(id, Connection { sender, user_id: None });
        info!("Connection {} opened ({} live)", id, state.connections.len());
        id
    }

    pub async fn bind_identity(&self, id: ConnectionId, user_id: &str) -> Result<(), HubError> {
        let mut state = self.state.write().await;
        let Some(connection) = state.connections.get_mut(&id) else {
            return Err(HubError::Unauthorized("connection is closed".into()));
        };
        if let Some(bound) = connection.user_id.as_deref() {
            return if bound == user_id {
                Ok(())
            } else {
                Err(HubError::bound_elsewhere())
            };
        }
        connection.user_id = Some(user_id.to_string());
        state
            .users
            .entry(user_id.to_string())
            .or_default()
            .insert(id);
        debug!("Connection {} bound to user {}", id, user_id);
        Ok(())
    }

    /// Forget the connection. Returns the user it was bound to, if any. Safe to
    /// call for unknown or already removed handles.
    pub async fn on_disconnect(&self, id: ConnectionId) -> Option<String> {
        let mut state = self.state.write().await;
        let connection = state.connections.remove(&id)?;
        if let Some(user_id) = &connection.user_id {
            if let Some(ids) = state.users.get_mut(user_id) {
                ids.remove(&id);
                if ids.is_empty() {
                    state.users.remove(user_id);
                }
            }
        }
        info!("Connection {} closed ({} live)", id, state.connections.len());
        connection.user_id
    }

    pub async fn is_live(&self, id: ConnectionId) -> bool {
        self.state.read().await.connections.contains_key(&id)
    }

    pub async fn user_of(&self, id: ConnectionId) -> Option<String> {
        let state = self.state.read().await;
        state.connections.get(&id)?.user_id.clone()
    }

    #[cfg(test)]
    pub async fn connections_of(&self, user_id: &str) -> Vec<ConnectionId> {
        let state = self.state.read().await;
        state
            .users
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Distinct users with at least one bound connection.
    pub async fn user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Send to a single connection. Returns whether the frame was queued.
    pub async fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        match message.to_frame() {
            Some(frame) => self.deliver(&[id], &frame).await == 1,
            None => false,
        }
    }

    /// Queue `frame` on every listed connection that is still open. A failure
    /// on one connection never stops delivery to the rest. Returns how many
    /// connections the frame was queued on.
    pub async fn deliver(&self, targets: &[ConnectionId], frame: &WsMessage) -> usize {
        let state = self.state.read().await;
        let mut delivered = 0;
        for id in targets {
            let Some(connection) = state.connections.get(id) else {
                continue;
            };
            if connection.sender.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("Dropping frame for connection {}: writer is gone", id);
            }
        }
        delivered
    }
}
