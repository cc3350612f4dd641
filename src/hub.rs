use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use warp::ws::WebSocket;

use crate::config::HubConfig;
use crate::error::HubError;
use crate::ingest::MessagePipeline;
use crate::messages::{ClientMessage, SendMessage, ServerMessage};
use crate::models::Message;
use crate::presence::PresenceRelay;
use crate::registry::{ConnectionId, ConnectionRegistry, Outbound};
use crate::rooms::{JoinOutcome, RoomManager};
use crate::store::Store;

/// The real-time group hub. Owns every component and wires them to one
/// shared store; create one per process and share it behind an `Arc`.
pub struct Hub {
    config: HubConfig,
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    pipeline: MessagePipeline,
    presence: PresenceRelay,
}

impl Hub {
    pub fn new(store: Arc<dyn Store>, config: HubConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new(store.clone(), registry.clone()));
        let pipeline = MessagePipeline::new(
            store.clone(),
            rooms.clone(),
            registry.clone(),
            config.max_message_length,
        );
        let presence = PresenceRelay::new(rooms.clone());

        Hub {
            config,
            store,
            registry,
            rooms,
            pipeline,
            presence,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    /// Register a new connection and greet it with its handle.
    pub async fn connect(&self, sender: Outbound) -> ConnectionId {
        let id = self.registry.on_connect(sender).await;
        self.registry
            .send_to(id, &ServerMessage::Connected { connection_id: id.to_string() })
            .await;
        id
    }

    /// Purge the connection from the registry first, then from every room.
    pub async fn disconnect(&self, id: ConnectionId) {
        let user_id = self.registry.on_disconnect(id).await;
        let groups = self.rooms.leave_all(id).await;
        info!(
            "Connection {} ({}) cleaned up, left {} rooms",
            id,
            user_id.as_deref().unwrap_or("anonymous"),
            groups.len()
        );
    }

    /// Decode a raw text frame and dispatch it.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        match ClientMessage::parse(text) {
            Ok(event) => self.dispatch(id, event).await,
            Err(err) => self.report(id, &err).await,
        }
    }

    /// Handle one inbound event. Failures go back to `id` alone.
    pub async fn dispatch(&self, id: ConnectionId, event: ClientMessage) {
        let result = match event {
            ClientMessage::JoinGroup { group_id, user_id } => {
                self.join_group(id, &user_id, &group_id).await.map(|_| ())
            }
            ClientMessage::LeaveGroup { group_id } => {
                self.rooms.leave(id, &group_id).await;
                Ok(())
            }
            ClientMessage::SendMessage(request) => self.send_message(id, request).await.map(|_| ()),
            ClientMessage::TypingStart { group_id, user_id, user_name } => {
                self.typing(id, &user_id, &group_id, Some(&user_name)).await
            }
            ClientMessage::TypingStop { group_id, user_id } => {
                self.typing(id, &user_id, &group_id, None).await
            }
        };

        if let Err(err) = result {
            self.report(id, &err).await;
        }
    }

    pub async fn join_group(
        &self,
        id: ConnectionId,
        user_id: &str,
        group_id: &str,
    ) -> Result<JoinOutcome, HubError> {
        // identity is only bound by a join that succeeds
        if let Some(bound) = self.registry.user_of(id).await {
            if bound != user_id {
                return Err(HubError::bound_elsewhere());
            }
        }
        let outcome = self.rooms.join(id, user_id, group_id).await?;
        if let Err(err) = self.registry.bind_identity(id, user_id).await {
            if outcome == JoinOutcome::Joined {
                self.rooms.leave(id, group_id).await;
            }
            return Err(err);
        }
        Ok(outcome)
    }

    pub async fn send_message(
        &self,
        id: ConnectionId,
        request: SendMessage,
    ) -> Result<Message, HubError> {
        self.ensure_in_room(id, &request.user_id, &request.group_id)
            .await?;
        self.pipeline.submit(id, request).await
    }

    /// `user_name` is only carried by typing-start.
    async fn typing(
        &self,
        id: ConnectionId,
        user_id: &str,
        group_id: &str,
        user_name: Option<&str>,
    ) -> Result<(), HubError> {
        self.ensure_in_room(id, user_id, group_id).await?;
        match user_name {
            Some(name) => self.presence.typing_start(id, user_id, name, group_id).await,
            None => self.presence.typing_stop(id, user_id, group_id).await,
        };
        Ok(())
    }

    /// Acting on a group requires speaking as the bound user from inside its room.
    async fn ensure_in_room(
        &self,
        id: ConnectionId,
        user_id: &str,
        group_id: &str,
    ) -> Result<(), HubError> {
        if self.registry.user_of(id).await.as_deref() != Some(user_id) {
            return Err(HubError::Unauthorized(
                "connection is not signed in as this user".into(),
            ));
        }
        if !self.rooms.is_joined(id, group_id).await {
            return Err(HubError::Unauthorized(format!(
                "join group {group_id} before posting to it"
            )));
        }
        Ok(())
    }

    async fn report(&self, id: ConnectionId, err: &HubError) {
        match err {
            HubError::MembershipLookup(_) | HubError::Persistence(_) | HubError::Overloaded => {
                warn!("Connection {}: {} error: {:?}", id, err.kind(), err);
            }
            _ => debug!("Connection {}: {} error: {}", id, err.kind(), err),
        }
        self.registry.send_to(id, &ServerMessage::for_error(err)).await;
    }

    /// Recent messages for a member, as served to clients on initial load.
    pub async fn history(
        &self,
        user_id: &str,
        group_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, HubError> {
        let is_member = self
            .store
            .is_member(user_id, group_id)
            .await
            .map_err(HubError::MembershipLookup)?;
        if !is_member {
            return Err(HubError::not_a_member(group_id));
        }
        self.store
            .list_recent_messages(group_id, self.config.history_limit(limit))
            .await
            .map_err(HubError::Persistence)
    }

    /// Queue a frame for the connection's worker without waiting, so the reader
    /// always sees a close at once. A full queue sheds the frame and tells the
    /// sender. Returns false once the worker is gone.
    async fn enqueue(&self, id: ConnectionId, queue: &mpsc::Sender<String>, text: String) -> bool {
        match queue.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.report(id, &HubError::Overloaded).await;
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Drive one WebSocket until it closes. Events from this socket are
    /// handled strictly in arrival order by a dedicated worker.
    pub async fn handle_connection(self: Arc<Self>, ws: WebSocket) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.connect(tx).await;

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    debug!("Failed to send WebSocket message to {}: {}", id, e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let (event_tx, mut event_rx) = mpsc::channel::<String>(self.config.event_queue_depth);
        let hub = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(text) = event_rx.recv().await {
                hub.handle_text(id, &text).await;
            }
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(message) if message.is_close() => break,
                Ok(message) => {
                    if let Ok(text) = message.to_str() {
                        if !self.enqueue(id, &event_tx, text.to_string()).await {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!("WebSocket error on {}: {}", id, e);
                    break;
                }
            }
        }

        // purge now; an event still in the worker finishes against the remaining peers
        self.disconnect(id).await;
    }
}
