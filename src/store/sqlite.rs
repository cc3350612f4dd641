use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use super::Store;
use crate::error::StoreError;
use crate::models::{
    FileMeta, Membership, Message, NewMessage, Notification, NotificationDraft, Role,
};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL,
        user_id TEXT,
        content TEXT NOT NULL,
        type TEXT NOT NULL,
        is_urgent INTEGER NOT NULL DEFAULT 0,
        file TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_group_created ON messages (group_id, created_at)",
    "CREATE TABLE IF NOT EXISTS group_members (
        user_id TEXT NOT NULL,
        group_id TEXT NOT NULL,
        role TEXT NOT NULL,
        PRIMARY KEY (user_id, group_id)
    )",
    "CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        recipient_user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        type TEXT NOT NULL,
        related_message_id TEXT NOT NULL,
        is_read INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
];

/// sqlx-backed store. Creates its tables on connect.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(16);
        if database_url.contains(":memory:") {
            // each connection to an in-memory database gets its own database, and
            // closing the last one drops it
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        let store = SqliteStore { pool };
        store.migrate().await?;
        info!("SQLite store ready at {}", database_url);
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Membership is owned by the CRUD layer; this exists for seeding.
    pub async fn add_member(
        &self,
        user_id: &str,
        group_id: &str,
        role: Role,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO group_members (user_id, group_id, role) VALUES (?, ?, ?)
             ON CONFLICT (user_id, group_id) DO UPDATE SET role = excluded.role",
        )
        .bind(user_id)
        .bind(group_id)
        .bind(role.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, recipient_user_id, title, message, type, related_message_id,
                    is_read, created_at
             FROM notifications WHERE recipient_user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {err}"))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| corrupt("id", e))
}

// fixed width so that text ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt("created_at", e))
}

fn message_from_row(row: &SqliteRow) -> Result<Message, StoreError> {
    let id: String = row.try_get("id")?;
    let message_type: String = row.try_get("type")?;
    let file: Option<String> = row.try_get("file")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Message {
        id: parse_uuid(&id)?,
        group_id: row.try_get("group_id")?,
        user_id: row.try_get("user_id")?,
        content: row.try_get("content")?,
        message_type: message_type.parse().map_err(|e| corrupt("type", e))?,
        is_urgent: row.try_get("is_urgent")?,
        created_at: parse_time(&created_at)?,
        file: file
            .map(|raw| serde_json::from_str::<FileMeta>(&raw))
            .transpose()
            .map_err(|e| corrupt("file", e))?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification, StoreError> {
    let id: String = row.try_get("id")?;
    let notification_type: String = row.try_get("type")?;
    let related: String = row.try_get("related_message_id")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Notification {
        id: parse_uuid(&id)?,
        recipient_user_id: row.try_get("recipient_user_id")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        notification_type: notification_type.parse().map_err(|e| corrupt("type", e))?,
        related_message_id: parse_uuid(&related)?,
        is_read: row.try_get("is_read")?,
        created_at: parse_time(&created_at)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
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
        let file = stored
            .file
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| corrupt("file", e))?;

        sqlx::query(
            "INSERT INTO messages
             (id, group_id, user_id, content, type, is_urgent, file, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(stored.id.to_string())
        .bind(&stored.group_id)
        .bind(stored.user_id.as_deref())
        .bind(&stored.content)
        .bind(stored.message_type.as_str())
        .bind(stored.is_urgent)
        .bind(file)
        .bind(timestamp(stored.created_at))
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn list_recent_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, group_id, user_id, content, type, is_urgent, file, created_at
             FROM messages WHERE group_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(group_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn is_member(&self, user_id: &str, group_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM group_members WHERE user_id = ? AND group_id = ?")
            .bind(user_id)
            .bind(group_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn list_members(&self, group_id: &str) -> Result<Vec<Membership>, StoreError> {
        let rows =
            sqlx::query("SELECT user_id, group_id, role FROM group_members WHERE group_id = ?")
                .bind(group_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| -> Result<Membership, StoreError> {
                let role: String = row.try_get("role")?;
                Ok(Membership {
                    user_id: row.try_get("user_id")?,
                    group_id: row.try_get("group_id")?,
                    role: role.parse().map_err(|e| corrupt("role", e))?,
                })
            })
            .collect()
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

        let mut tx = self.pool.begin().await?;
        for notification in &created {
            sqlx::query(
                "INSERT INTO notifications
                 (id, recipient_user_id, title, message, type, related_message_id,
                  is_read, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(notification.id.to_string())
            .bind(&notification.recipient_user_id)
            .bind(&notification.title)
            .bind(&notification.message)
            .bind(notification.notification_type.as_str())
            .bind(notification.related_message_id.to_string())
            .bind(notification.is_read)
            .bind(timestamp(notification.created_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn message_round_trips_through_sqlite() {
        let store = store().await;
        let created = store
            .create_message(NewMessage {
                group_id: "g1".into(),
                user_id: "alice".into(),
                content: "see attached".into(),
                message_type: MessageType::File,
                is_urgent: true,
                file: Some(FileMeta {
                    url: "/files/notes.pdf".into(),
                    name: "notes.pdf".into(),
                    size: 1024,
                    mime_type: "application/pdf".into(),
                }),
            })
            .await
            .unwrap();

        let listed = store.list_recent_messages("g1", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].message_type, MessageType::File);
        assert!(listed[0].is_urgent);
        assert_eq!(listed[0].file, created.file);
    }

    #[tokio::test]
    async fn members_and_notifications() {
        let store = store().await;
        store.add_member("alice", "g1", Role::Admin).await.unwrap();
        store.add_member("bob", "g1", Role::Member).await.unwrap();
        store.add_member("bob", "g1", Role::Moderator).await.unwrap();

        assert!(store.is_member("bob", "g1").await.unwrap());
        assert!(!store.is_member("carol", "g1").await.unwrap());
        let members = store.list_members("g1").await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().any(|m| m.user_id == "bob" && m.role == Role::Moderator));

        let draft = NotificationDraft {
            title: "Urgent message".into(),
            message: "exam moved".into(),
            notification_type: crate::models::NotificationType::UrgentMessage,
            related_message_id: Uuid::new_v4(),
        };
        let created = store
            .create_notifications_for_members(&["bob".to_string()], &draft)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);

        let stored = store.notifications_for("bob").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].related_message_id, draft.related_message_id);
        assert!(!stored[0].is_read);
        assert!(store.notifications_for("alice").await.unwrap().is_empty());
    }
}
