use std::sync::Arc;

use log::{debug, warn};

use crate::error::HubError;
use crate::fanout::NotificationFanout;
use crate::messages::{SendMessage, ServerMessage};
use crate::models::{Message, MessageType, NewMessage};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::rooms::RoomManager;
use crate::store::Store;

/// Validates, persists and then broadcasts chat messages. Nothing is
/// broadcast before the store has accepted it.
pub struct MessagePipeline {
    store: Arc<dyn Store>,
    rooms: Arc<RoomManager>,
    registry: Arc<ConnectionRegistry>,
    fanout: NotificationFanout,
    max_message_length: usize,
}

impl MessagePipeline {
    pub fn new(
        store: Arc<dyn Store>,
        rooms: Arc<RoomManager>,
        registry: Arc<ConnectionRegistry>,
        max_message_length: usize,
    ) -> Self {
        let fanout = NotificationFanout::new(store.clone(), rooms.clone());
        MessagePipeline {
            store,
            rooms,
            registry,
            fanout,
            max_message_length,
        }
    }

    pub async fn submit(
        &self,
        id: ConnectionId,
        request: SendMessage,
    ) -> Result<Message, HubError> {
        self.validate(&request)?;

        let message = self
            .store
            .create_message(NewMessage {
                group_id: request.group_id,
                user_id: request.user_id,
                content: request.content,
                message_type: request.message_type,
                is_urgent: request.is_urgent,
                file: request.file,
            })
            .await
            .map_err(|e| {
                warn!("Failed to persist message from {}: {}", id, e);
                HubError::Persistence(e)
            })?;

        let delivered = self
            .rooms
            .broadcast(&message.group_id, &ServerMessage::NewMessage(message.clone()))
            .await;
        debug!("Message {} delivered to {} connections", message.id, delivered);

        if message.is_urgent {
            // the message is already out; a failed fanout only earns the sender a warning
            if let Err(err) = self.fanout.fanout_urgent(&message).await {
                warn!("Fanout for message {} degraded: {:?}", message.id, err);
                self.registry
                    .send_to(id, &ServerMessage::for_error(&err))
                    .await;
            }
        }

        Ok(message)
    }

    fn validate(&self, request: &SendMessage) -> Result<(), HubError> {
        if request.content.trim().is_empty() && request.message_type != MessageType::System {
            return Err(HubError::Validation("message content is empty".into()));
        }
        if request.content.chars().count() > self.max_message_length {
            return Err(HubError::Validation(format!(
                "message exceeds {} characters",
                self.max_message_length
            )));
        }
        Ok(())
    }
}
