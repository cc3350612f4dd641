//! The durable side of the platform. The hub only ever talks to it through
//! [`Store`], so tests can swap in fakes.

mod memory;
mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Membership, Message, NewMessage, Notification, NotificationDraft};

#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a message and return it with its assigned id and timestamp.
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Most recent `limit` messages of a group, oldest first.
    async fn list_recent_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn is_member(&self, user_id: &str, group_id: &str) -> Result<bool, StoreError>;

    async fn list_members(&self, group_id: &str) -> Result<Vec<Membership>, StoreError>;

    /// Bulk insert: one notification per recipient, all or nothing.
    async fn create_notifications_for_members(
        &self,
        recipients: &[String],
        draft: &NotificationDraft,
    ) -> Result<Vec<Notification>, StoreError>;
}
