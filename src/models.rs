use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::Image => "IMAGE",
            MessageType::File => "FILE",
            MessageType::System => "SYSTEM",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(MessageType::Text),
            "IMAGE" => Ok(MessageType::Image),
            "FILE" => Ok(MessageType::File),
            "SYSTEM" => Ok(MessageType::System),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub url: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// A persisted chat message. Immutable once the store has created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub group_id: String,
    pub user_id: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub is_urgent: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
}

/// A validated message waiting to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub group_id: String,
    pub user_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_urgent: bool,
    pub file: Option<FileMeta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Moderator,
    Member,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "ADMIN",
            Role::Moderator => "MODERATOR",
            Role::Member => "MEMBER",
        })
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Role::Admin),
            "MODERATOR" => Ok(Role::Moderator),
            "MEMBER" => Ok(Role::Member),
            other => Err(format!("unknown role {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub user_id: String,
    pub group_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    UrgentMessage,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::UrgentMessage => "URGENT_MESSAGE",
        }
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "URGENT_MESSAGE" => Ok(NotificationType::UrgentMessage),
            other => Err(format!("unknown notification type {other}")),
        }
    }
}

/// The recipient-independent part of a notification. One draft is written
/// once per recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDraft {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub related_message_id: Uuid,
}

impl NotificationDraft {
    pub fn urgent(message: &Message) -> Self {
        NotificationDraft {
            title: "Urgent message".to_string(),
            message: preview(&message.content),
            notification_type: NotificationType::UrgentMessage,
            related_message_id: message.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub related_message_id: Uuid,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn from_draft(recipient_user_id: &str, draft: &NotificationDraft) -> Self {
        Notification {
            id: Uuid::new_v4(),
            recipient_user_id: recipient_user_id.to_string(),
            title: draft.title.clone(),
            message: draft.message.clone(),
            notification_type: draft.notification_type,
            related_message_id: draft.related_message_id,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut short: String = content.chars().take(PREVIEW_CHARS).collect();
    short.push_str("...");
    short
}
