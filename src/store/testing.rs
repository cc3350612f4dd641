use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use super::{MemoryStore, Store};
use crate::error::StoreError;
use crate::models::{Membership, Message, NewMessage, Notification, NotificationDraft};

/// A [`MemoryStore`] whose operations can be made to fail on demand.
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_writes: AtomicBool,
    pub fail_membership: AtomicBool,
    pub fail_roster: AtomicBool,
    pub fail_notifications: AtomicBool,
    pub membership_checks: AtomicUsize,
}

impl FlakyStore {
    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }
}

fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
    if flag.load(Ordering::SeqCst) {
        Err(StoreError::Unavailable(format!("{what} failed")))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        check(&self.fail_writes, "insert message")?;
        self.inner.create_message(message).await
    }

    async fn list_recent_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner.list_recent_messages(group_id, limit).await
    }

    async fn is_member(&self, user_id: &str, group_id: &str) -> Result<bool, StoreError> {
        self.membership_checks.fetch_add(1, Ordering::SeqCst);
        check(&self.fail_membership, "membership lookup")?;
        self.inner.is_member(user_id, group_id).await
    }

    async fn list_members(&self, group_id: &str) -> Result<Vec<Membership>, StoreError> {
        check(&self.fail_roster, "roster fetch")?;
        self.inner.list_members(group_id).await
    }

    async fn create_notifications_for_members(
        &self,
        recipients: &[String],
        draft: &NotificationDraft,
    ) -> Result<Vec<Notification>, StoreError> {
        check(&self.fail_notifications, "insert notifications")?;
        self.inner
            .create_notifications_for_members(recipients, draft)
            .await
    }
}

/// Holds every call at a chosen store operation until the test lets it through.
pub(crate) struct Gate {
    permits: Semaphore,
    entered: Notify,
}

impl Gate {
    fn open() -> Self {
        Gate { permits: Semaphore::new(Semaphore::MAX_PERMITS), entered: Notify::new() }
    }

    fn closed() -> Self {
        Gate { permits: Semaphore::new(0), entered: Notify::new() }
    }

    /// Let `n` waiting or future calls through.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    /// Resolves once a call has reached the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    async fn pass(&self) -> Result<(), StoreError> {
        self.entered.notify_one();
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        permit.forget();
        Ok(())
    }
}

/// A [`MemoryStore`] whose message writes or membership lookups hang until
/// released, for exercising events that interleave with slow storage.
pub(crate) struct GatedStore {
    pub inner: MemoryStore,
    pub writes: Gate,
    pub lookups: Gate,
}

impl GatedStore {
    pub fn gating_writes() -> Self {
        GatedStore { inner: MemoryStore::new(), writes: Gate::closed(), lookups: Gate::open() }
    }

    pub fn gating_lookups() -> Self {
        GatedStore { inner: MemoryStore::new(), writes: Gate::open(), lookups: Gate::closed() }
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.writes.pass().await?;
        self.inner.create_message(message).await
    }

    async fn list_recent_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner.list_recent_messages(group_id, limit).await
    }

    async fn is_member(&self, user_id: &str, group_id: &str) -> Result<bool, StoreError> {
        self.lookups.pass().await?;
        self.inner.is_member(user_id, group_id).await
    }

    async fn list_members(&self, group_id: &str) -> Result<Vec<Membership>, StoreError> {
        self.inner.list_members(group_id).await
    }

    async fn create_notifications_for_members(
        &self,
        recipients: &[String],
        draft: &NotificationDraft,
    ) -> Result<Vec<Notification>, StoreError> {
        self.inner
            .create_notifications_for_members(recipients, draft)
            .await
    }
}
