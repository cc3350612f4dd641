use log::error;
use serde::{Deserialize, Serialize};
use warp::ws::Message as WsMessage;

use crate::error::HubError;
use crate::models::{FileMeta, Message, MessageType, NotificationDraft};

/// Events a client may send over its socket. Every frame is
/// `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    JoinGroup {
        group_id: String,
        user_id: String,
    },
    LeaveGroup {
        group_id: String,
    },
    SendMessage(SendMessage),
    TypingStart {
        group_id: String,
        user_id: String,
        user_name: String,
    },
    TypingStop {
        group_id: String,
        user_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub group_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub file: Option<FileMeta>,
}

impl ClientMessage {
    /// Decode and validate a text frame. Anything that fails here never
    /// reaches a component.
    pub fn parse(text: &str) -> Result<Self, HubError> {
        let message: ClientMessage = serde_json::from_str(text)
            .map_err(|e| HubError::Validation(format!("malformed event: {e}")))?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), HubError> {
        let (group_id, user_id) = match self {
            ClientMessage::JoinGroup { group_id, user_id }
            | ClientMessage::TypingStart { group_id, user_id, .. }
            | ClientMessage::TypingStop { group_id, user_id } => (group_id, Some(user_id)),
            ClientMessage::LeaveGroup { group_id } => (group_id, None),
            ClientMessage::SendMessage(send) => (&send.group_id, Some(&send.user_id)),
        };
        if group_id.trim().is_empty() {
            return Err(HubError::Validation("groupId is required".into()));
        }
        if user_id.is_some_and(|u| u.trim().is_empty()) {
            return Err(HubError::Validation("userId is required".into()));
        }
        Ok(())
    }
}

/// Events the hub emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Connected {
        connection_id: String,
    },
    NewMessage(Message),
    UrgentMessage {
        message: Message,
        notification: NotificationDraft,
    },
    UserTyping {
        group_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        is_typing: bool,
    },
    Error {
        message: String,
    },
    Warning {
        message: String,
    },
}

impl ServerMessage {
    pub fn for_error(err: &HubError) -> Self {
        if err.is_warning() {
            ServerMessage::Warning { message: err.to_string() }
        } else {
            ServerMessage::Error { message: err.to_string() }
        }
    }

    /// Serialize once into a text frame that can be cloned per recipient.
    pub fn to_frame(&self) -> Option<WsMessage> {
        match serde_json::to_string(self) {
            Ok(text) => Some(WsMessage::text(text)),
            Err(e) => {
                error!("Failed to serialize outbound event: {}", e);
                None
            }
        }
    }
}
