use std::collections::BTreeSet;
use std::sync::Arc;

use log::info;

use crate::error::HubError;
use crate::messages::ServerMessage;
use crate::models::{Message, Notification, NotificationDraft};
use crate::rooms::RoomManager;
use crate::store::Store;

/// Writes one durable notification per group member except the author, then
/// nudges the live room.
pub struct NotificationFanout {
    store: Arc<dyn Store>,
    rooms: Arc<RoomManager>,
}

impl NotificationFanout {
    pub fn new(store: Arc<dyn Store>, rooms: Arc<RoomManager>) -> Self {
        NotificationFanout { store, rooms }
    }

    pub async fn fanout_urgent(&self, message: &Message) -> Result<Vec<Notification>, HubError> {
        let roster = self
            .store
            .list_members(&message.group_id)
            .await
            .map_err(HubError::FanoutDegraded)?;

        // one row per member, however many memberships or connections they have
        let recipients: Vec<String> = roster
            .into_iter()
            .map(|membership| membership.user_id)
            .filter(|user_id| Some(user_id.as_str()) != message.user_id.as_deref())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let draft = NotificationDraft::urgent(message);
        let created = if recipients.is_empty() {
            Vec::new()
        } else {
            self.store
                .create_notifications_for_members(&recipients, &draft)
                .await
                .map_err(HubError::FanoutDegraded)?
        };
        info!(
            "Urgent message {} in group {}: {} notifications",
            message.id,
            message.group_id,
            created.len()
        );

        self.rooms
            .broadcast(
                &message.group_id,
                &ServerMessage::UrgentMessage {
                    message: message.clone(),
                    notification: draft,
                },
            )
            .await;
        Ok(created)
    }
}
