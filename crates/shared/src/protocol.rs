//! Socket.IO event contract of the chat, support and notification gateways.
//!
//! Payload field names are fixed by the server and must not change.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{flexible_timestamp, Message, MessageType};

/// Event names
pub mod events {
    pub const SEND_MESSAGE: &str = "send_message";
    pub const GET_MESSAGES_HISTORY: &str = "get_messages_history";
    pub const REGISTER_PROFESSIONAL: &str = "register_professional";
    pub const REGISTER_AGENT: &str = "register_agent";
    pub const SUBSCRIBE_NOTIFICATIONS: &str = "subscribe_notifications";

    pub const MESSAGE: &str = "message";
    pub const NOTIFICATION: &str = "notification";
    pub const MESSAGES_HISTORY: &str = "messages_history";
    pub const ERROR: &str = "error";
}

/// Which party a socket connection registers as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Coach,
    Dietitian,
    Support,
    Notifications,
}

impl ChannelRole {
    /// Socket.IO namespace served for this role.
    pub fn namespace(&self) -> &'static str {
        match self {
            ChannelRole::Coach | ChannelRole::Dietitian => "/chat",
            ChannelRole::Support => "/support",
            ChannelRole::Notifications => "/notifications",
        }
    }

    /// Event emitted right after the namespace handshake succeeds.
    pub fn register_event(&self) -> &'static str {
        match self {
            ChannelRole::Coach | ChannelRole::Dietitian => events::REGISTER_PROFESSIONAL,
            ChannelRole::Support => events::REGISTER_AGENT,
            ChannelRole::Notifications => events::SUBSCRIBE_NOTIFICATIONS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Coach => "coach",
            ChannelRole::Dietitian => "dietitian",
            ChannelRole::Support => "support",
            ChannelRole::Notifications => "notifications",
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coach" => Ok(ChannelRole::Coach),
            "dietitian" => Ok(ChannelRole::Dietitian),
            "support" => Ok(ChannelRole::Support),
            "notifications" => Ok(ChannelRole::Notifications),
            other => Err(format!("unknown channel role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Web,
    Ios,
    Android,
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "web" => Ok(Platform::Web),
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

// --- Client → server ---

/// Payload of `send_message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutgoingMessage {
    pub chat_id: String,
    /// Recipient user id.
    pub to: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
}

/// Payload of `get_messages_history`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRequest {
    pub chat_id: String,
    pub page: u32,
    pub limit: u32,
}

/// Payload of the role's registration event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub user_id: String,
    pub role: ChannelRole,
    pub platform: Platform,
    pub conversation_ids: Vec<String>,
}

// --- Server → client ---

/// `message` event: the server's echo of a created message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEcho {
    pub id: String,
    pub chat_id: String,
    pub from: String,
    pub message: String,
    #[serde(with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl MessageEcho {
    pub fn dedup_key(&self) -> String {
        dedup_key(Some(&self.id), &self.chat_id, &self.message, &self.from)
    }

    pub fn into_message(self) -> Message {
        Message::text(self.id, self.chat_id, self.from, self.message, self.timestamp)
    }
}

/// `notification` event envelope. Only `new_message` carries data the
/// stores act on; other kinds are counted and otherwise ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub const NOTIFICATION_NEW_MESSAGE: &str = "new_message";

impl NotificationEvent {
    pub fn new_message(&self) -> Option<NewMessageNotification> {
        if self.kind != NOTIFICATION_NEW_MESSAGE {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageNotification {
    /// Server message id, when the gateway includes it.
    #[serde(default)]
    pub id: Option<String>,
    pub chat_id: String,
    pub message: String,
    pub user_id: String,
    #[serde(with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sender: Option<NotificationSender>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationSender {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl NewMessageNotification {
    pub fn sender_id(&self) -> &str {
        self.sender
            .as_ref()
            .and_then(|s| s.id.as_deref())
            .unwrap_or(&self.user_id)
    }

    pub fn dedup_key(&self) -> String {
        dedup_key(self.id.as_deref(), &self.chat_id, &self.message, self.sender_id())
    }
}

/// One entry of a `messages_history` batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub from: String,
    pub message: String,
    #[serde(with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagesHistory {
    pub chat_id: String,
    pub messages: Vec<HistoryEntry>,
    #[serde(default)]
    pub total: u64,
}

impl MessagesHistory {
    pub fn into_messages(self) -> Vec<Message> {
        let chat_id = self.chat_id;
        self.messages
            .into_iter()
            .map(|entry| Message {
                is_read: entry.is_read,
                message_type: MessageType::Text,
                ..Message::text(
                    entry.id,
                    entry.chat_id.unwrap_or_else(|| chat_id.clone()),
                    entry.from,
                    entry.message,
                    entry.timestamp,
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// A decoded server → client event.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Message(MessageEcho),
    Notification(NotificationEvent),
    MessagesHistory(MessagesHistory),
    Error(ServerError),
    Other { name: String, payload: serde_json::Value },
}

impl ServerEvent {
    /// Decode an event by name from its first argument.
    pub fn from_event(name: &str, payload: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match name {
            events::MESSAGE => ServerEvent::Message(serde_json::from_value(payload)?),
            events::NOTIFICATION => ServerEvent::Notification(serde_json::from_value(payload)?),
            events::MESSAGES_HISTORY => {
                ServerEvent::MessagesHistory(serde_json::from_value(payload)?)
            }
            events::ERROR => ServerEvent::Error(match payload {
                serde_json::Value::String(message) => ServerError { message, code: None },
                other => serde_json::from_value(other)?,
            }),
            _ => ServerEvent::Other {
                name: name.to_string(),
                payload,
            },
        })
    }
}

/// Key identifying one delivery of a pushed message: `id` (or the chat id
/// when absent), content and sender.
fn dedup_key(id: Option<&str>, chat_id: &str, content: &str, sender_id: &str) -> String {
    format!("{}\u{1f}{}\u{1f}{}", id.unwrap_or(chat_id), content, sender_id)
}
