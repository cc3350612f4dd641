use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::RwLock;

use crate::error::HubError;
use crate::messages::ServerMessage;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
}

#[derive(Default)]
struct RoomState {
    rooms: HashMap<String, HashSet<ConnectionId>>, // group_id -> subscribers
    joined: HashMap<ConnectionId, HashSet<String>>,
}

impl RoomState {
    fn remove(&mut self, id: ConnectionId, group_id: &str) -> bool {
        let Some(members) = self.rooms.get_mut(group_id) else {
            return false;
        };
        let removed = members.remove(&id);
        if members.is_empty() {
            self.rooms.remove(group_id);
        }
        removed
    }
}

/// Per-group sets of subscribed connections. Rooms come into existence on the
/// first successful join and disappear with their last member.
pub struct RoomManager {
    store: Arc<dyn Store>,
    registry: Arc<ConnectionRegistry>,
    state: RwLock<RoomState>,
}

impl RoomManager {
    pub fn new(store: Arc<dyn Store>, registry: Arc<ConnectionRegistry>) -> Self {
        RoomManager {
            store,
            registry,
            state: RwLock::new(RoomState::default()),
        }
    }

    /// Subscribe `id` to `group_id` if `user_id` is a member of the group.
    pub async fn join(
        &self,
        id: ConnectionId,
        user_id: &str,
        group_id: &str,
    ) -> Result<JoinOutcome, HubError> {
        let is_member = self
            .store
            .is_member(user_id, group_id)
            .await
            .map_err(HubError::MembershipLookup)?;
        if !is_member {
            info!("Denied join of {} to group {} via {}", user_id, group_id, id);
            return Err(HubError::not_a_member(group_id));
        }

        let mut state = self.state.write().await;
        // disconnect purges the registry before the rooms, so a liveness check
        // under the room lock cannot race with it
        if !self.registry.is_live(id).await {
            return Err(HubError::Unauthorized("connection is closed".into()));
        }
        let added = state
            .rooms
            .entry(group_id.to_string())
            .or_default()
            .insert(id);
        state.joined.entry(id).or_default().insert(group_id.to_string());

        if added {
            info!("{} joined group {} via {}", user_id, group_id, id);
            Ok(JoinOutcome::Joined)
        } else {
            Ok(JoinOutcome::AlreadyJoined)
        }
    }

    pub async fn leave(&self, id: ConnectionId, group_id: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state.remove(id, group_id);
        if let Some(groups) = state.joined.get_mut(&id) {
            groups.remove(group_id);
            if groups.is_empty() {
                state.joined.remove(&id);
            }
        }
        if removed {
            debug!("Connection {} left group {}", id, group_id);
        }
        removed
    }

    /// Drop `id` from every room. Returns the groups it was in.
    pub async fn leave_all(&self, id: ConnectionId) -> Vec<String> {
        let mut state = self.state.write().await;
        let groups: Vec<String> = state
            .joined
            .remove(&id)
            .map(|groups| groups.into_iter().collect())
            .unwrap_or_default();
        for group_id in &groups {
            state.remove(id, group_id);
        }
        groups
    }

    pub async fn is_joined(&self, id: ConnectionId, group_id: &str) -> bool {
        let state = self.state.read().await;
        state
            .rooms
            .get(group_id)
            .is_some_and(|members| members.contains(&id))
    }

    pub async fn members(&self, group_id: &str) -> Vec<ConnectionId> {
        let state = self.state.read().await;
        state
            .rooms
            .get(group_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }

    /// Best-effort delivery to every current subscriber. Returns how many
    /// connections the event was queued on.
    pub async fn broadcast(&self, group_id: &str, event: &ServerMessage) -> usize {
        self.broadcast_to(group_id, event, None).await
    }

    pub async fn broadcast_excluding(
        &self,
        group_id: &str,
        event: &ServerMessage,
        excluded: ConnectionId,
    ) -> usize {
        self.broadcast_to(group_id, event, Some(excluded)).await
    }

    async fn broadcast_to(
        &self,
        group_id: &str,
        event: &ServerMessage,
        excluded: Option<ConnectionId>,
    ) -> usize {
        let Some(frame) = event.to_frame() else {
            return 0;
        };
        let targets: Vec<ConnectionId> = {
            let state = self.state.read().await;
            let Some(members) = state.rooms.get(group_id) else {
                return 0;
            };
            members
                .iter()
                .copied()
                .filter(|id| Some(*id) != excluded)
                .collect()
        };
        let delivered = self.registry.deliver(&targets, &frame).await;
        debug!(
            "Broadcast to group {} reached {}/{} connections",
            group_id,
            delivered,
            targets.len()
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::registry::Outbound;
    use crate::store::testing::{FlakyStore, GatedStore};
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;
    use warp::ws::Message as WsMessage;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<ConnectionRegistry>,
        rooms: RoomManager,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.add_member("alice", "g1", Role::Member).await;
        store.add_member("bob", "g1", Role::Member).await;
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = RoomManager::new(store.clone(), registry.clone());
        Fixture { store, registry, rooms }
    }

    async fn connect(
        registry: &ConnectionRegistry,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx): (Outbound, _) = mpsc::unbounded_channel();
        (registry.on_connect(tx).await, rx)
    }

    #[tokio::test]
    async fn join_requires_membership() {
        let f = fixture().await;
        let (alice, _a) = connect(&f.registry).await;
        let (mallory, _m) = connect(&f.registry).await;

        assert_eq!(f.rooms.join(alice, "alice", "g1").await.unwrap(), JoinOutcome::Joined);
        let err = f.rooms.join(mallory, "mallory", "g1").await.unwrap_err();
        assert!(matches!(err, HubError::Unauthorized(_)));
        assert!(!f.rooms.is_joined(mallory, "g1").await);
        assert_eq!(f.rooms.members("g1").await, vec![alice]);
    }

    #[tokio::test]
    async fn membership_is_checked_at_call_time() {
        let f = fixture().await;
        let (carol, _c) = connect(&f.registry).await;
        assert!(f.rooms.join(carol, "carol", "g1").await.is_err());

        f.store.add_member("carol", "g1", Role::Member).await;
        assert!(f.rooms.join(carol, "carol", "g1").await.is_ok());
    }

    #[tokio::test]
    async fn rejoin_is_idempotent() {
        let f = fixture().await;
        let (alice, mut rx) = connect(&f.registry).await;
        f.rooms.join(alice, "alice", "g1").await.unwrap();
        assert_eq!(
            f.rooms.join(alice, "alice", "g1").await.unwrap(),
            JoinOutcome::AlreadyJoined
        );

        let delivered = f
            .rooms
            .broadcast("g1", &ServerMessage::Error { message: "x".into() })
            .await;
        assert_eq!(delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_excluding_skips_one_connection() {
        let f = fixture().await;
        let (alice, mut a) = connect(&f.registry).await;
        let (bob, mut b) = connect(&f.registry).await;
        f.rooms.join(alice, "alice", "g1").await.unwrap();
        f.rooms.join(bob, "bob", "g1").await.unwrap();

        let event = ServerMessage::Warning { message: "hello".into() };
        assert_eq!(f.rooms.broadcast_excluding("g1", &event, alice).await, 1);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn leave_all_purges_every_room() {
        let f = fixture().await;
        f.store.add_member("alice", "g2", Role::Member).await;
        let (alice, mut rx) = connect(&f.registry).await;
        f.rooms.join(alice, "alice", "g1").await.unwrap();
        f.rooms.join(alice, "alice", "g2").await.unwrap();
        assert_eq!(f.rooms.room_count().await, 2);

        let mut left = f.rooms.leave_all(alice).await;
        left.sort();
        assert_eq!(left, ["g1", "g2"]);
        assert_eq!(f.rooms.room_count().await, 0);
        assert_eq!(f.rooms.broadcast("g1", &ServerMessage::Error { message: "x".into() }).await, 0);
        assert!(rx.try_recv().is_err());

        assert!(f.rooms.leave_all(alice).await.is_empty());
        assert!(!f.rooms.leave(alice, "g1").await);
    }

    #[tokio::test]
    async fn leave_one_room_keeps_the_others() {
        let f = fixture().await;
        f.store.add_member("alice", "g2", Role::Member).await;
        let (alice, _rx) = connect(&f.registry).await;
        f.rooms.join(alice, "alice", "g1").await.unwrap();
        f.rooms.join(alice, "alice", "g2").await.unwrap();

        assert!(f.rooms.leave(alice, "g1").await);
        assert!(!f.rooms.is_joined(alice, "g1").await);
        assert!(f.rooms.is_joined(alice, "g2").await);
    }

    #[tokio::test]
    async fn closed_connection_cannot_join() {
        let f = fixture().await;
        let (alice, _rx) = connect(&f.registry).await;
        f.registry.on_disconnect(alice).await;

        assert!(f.rooms.join(alice, "alice", "g1").await.is_err());
        assert_eq!(f.rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn close_during_pending_lookup_is_not_a_join() {
        let store = Arc::new(GatedStore::gating_lookups());
        store.inner.add_member("alice", "g1", Role::Member).await;
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new(store.clone(), registry.clone()));
        let (alice, _rx) = connect(&registry).await;

        let pending = tokio::spawn({
            let rooms = rooms.clone();
            async move { rooms.join(alice, "alice", "g1").await }
        });
        store.lookups.entered().await;
        registry.on_disconnect(alice).await;
        rooms.leave_all(alice).await;
        store.lookups.release(1);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, HubError::Unauthorized(_)));
        assert!(!rooms.is_joined(alice, "g1").await);
        assert_eq!(rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn lookup_failure_is_not_a_join() {
        let store = Arc::new(FlakyStore::default());
        store.inner.add_member("alice", "g1", Role::Member).await;
        FlakyStore::set(&store.fail_membership, true);
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = RoomManager::new(store.clone(), registry.clone());
        let (alice, _rx) = connect(&registry).await;

        let err = rooms.join(alice, "alice", "g1").await.unwrap_err();
        assert!(matches!(err, HubError::MembershipLookup(_)));
        assert!(!rooms.is_joined(alice, "g1").await);
    }
}
