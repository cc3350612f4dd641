use std::sync::Arc;

use crate::messages::ServerMessage;
use crate::registry::ConnectionId;
use crate::rooms::RoomManager;

/// Typing indicators. Nothing here is persisted, and the originating
/// connection never hears its own signal.
pub struct PresenceRelay {
    rooms: Arc<RoomManager>,
}

impl PresenceRelay {
    pub fn new(rooms: Arc<RoomManager>) -> Self {
        PresenceRelay { rooms }
    }

    pub async fn typing_start(
        &self,
        id: ConnectionId,
        user_id: &str,
        user_name: &str,
        group_id: &str,
    ) -> usize {
        let event = ServerMessage::UserTyping {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            user_name: Some(user_name.to_string()),
            is_typing: true,
        };
        self.rooms.broadcast_excluding(group_id, &event, id).await
    }

    pub async fn typing_stop(&self, id: ConnectionId, user_id: &str, group_id: &str) -> usize {
        let event = ServerMessage::UserTyping {
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            user_name: None,
            is_typing: false,
        };
        self.rooms.broadcast_excluding(group_id, &event, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::registry::ConnectionRegistry;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn typing_reaches_peers_but_not_the_typist() {
        let store = Arc::new(MemoryStore::new());
        store.add_member("alice", "g1", Role::Member).await;
        store.add_member("bob", "g1", Role::Member).await;
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new(store.clone(), registry.clone()));
        let relay = PresenceRelay::new(rooms.clone());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let alice = registry.on_connect(tx_a).await;
        let bob = registry.on_connect(tx_b).await;
        rooms.join(alice, "alice", "g1").await.unwrap();
        rooms.join(bob, "bob", "g1").await.unwrap();

        assert_eq!(relay.typing_start(alice, "alice", "Alice", "g1").await, 1);
        assert_eq!(relay.typing_stop(alice, "alice", "g1").await, 1);
        assert!(rx_a.try_recv().is_err());

        let started: ServerMessage =
            serde_json::from_str(rx_b.try_recv().unwrap().to_str().unwrap()).unwrap();
        assert_eq!(
            started,
            ServerMessage::UserTyping {
                group_id: "g1".into(),
                user_id: "alice".into(),
                user_name: Some("Alice".into()),
                is_typing: true,
            }
        );
        let stopped: ServerMessage =
            serde_json::from_str(rx_b.try_recv().unwrap().to_str().unwrap()).unwrap();
        assert!(matches!(stopped, ServerMessage::UserTyping { is_typing: false, .. }));
        assert!(store.messages().await.is_empty());
    }
}
