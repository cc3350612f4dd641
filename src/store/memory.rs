use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Store;
use crate::error::StoreError;
use crate::models::{Membership, Message, NewMessage, Notification, NotificationDraft, Role};

#[derive(Default)]
struct MemoryState {
    messages: Vec<Message>,
    members: HashMap<String, HashMap<String, Role>>, // group_id -> user_id -> role
    notifications: Vec<Notification>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, user_id: &str, group_id: &str, role: Role) {
        let mut state = self.state.write().await;
        state
            .members
            .entry(group_id.to_string())
            .or_default()
            .insert(user_id.to_string(), role);
    }

    #[cfg(test)]
    pub async fn remove_member(&self, user_id: &str, group_id: &str) {
        let mut state = self.state.write().await;
        if let Some(group) = state.members.get_mut(group_id) {
            group.remove(user_id);
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.messages.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let stored = Message {
            id: Uuid::new_v4(),
            group_id: message.group_id,
            user_id: Some(message.user_id),
            content: message.content,
            message_type: message.message_type,
            is_urgent: message.is_urgent,
            created_at: Utc::now(),
            file: message.file,
        };
        self.state.write().await.messages.push(stored.clone());
        Ok(stored)
    }

    async fn list_recent_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        let mut recent: Vec<Message> = state
            .messages
            .iter()
            .rev()
            .filter(|m| m.group_id == group_id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn is_member(&self, user_id: &str, group_id: &str) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .get(group_id)
            .is_some_and(|group| group.contains_key(user_id)))
    }

    async fn list_members(&self, group_id: &str) -> Result<Vec<Membership>, StoreError> {
        let state = self.state.read().await;
        let Some(group) = state.members.get(group_id) else {
            return Ok(Vec::new());
        };
        Ok(group
            .iter()
            .map(|(user_id, role)| Membership {
                user_id: user_id.clone(),
                group_id: group_id.to_string(),
                role: *role,
            })
            .collect())
    }

    async fn create_notifications_for_members(
        &self,
        recipients: &[String],
        draft: &NotificationDraft,
    ) -> Result<Vec<Notification>, StoreError> {
        let created: Vec<Notification> = recipients
            .iter()
            .map(|recipient| Notification::from_draft(recipient, draft))
            .collect();
        self.state
            .write()
            .await
            .notifications
            .extend(created.iter().cloned());
        Ok(created)
    }
}
