//! Shared data models for conversations, support tickets and messages.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

// --- Messages ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    #[default]
    Text,
}

/// Client-side delivery state of a message. Not part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryState {
    /// Confirmed by the server (or loaded from history).
    #[default]
    Delivered,
    /// Optimistically inserted, waiting for the server echo.
    Pending,
    /// The send failed; the entry can be retried or discarded.
    Failed,
}

/// Prefix of ids generated for optimistic sends.
pub const TEMP_ID_PREFIX: &str = "temp-";
/// Prefix of ids generated for pushed messages that arrived without one.
pub const PUSH_ID_PREFIX: &str = "ws-";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    pub sender_id: String,
    #[serde(with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl Message {
    pub fn text(
        id: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            sender_id: sender_id.into(),
            created_at,
            is_read: false,
            message_type: MessageType::Text,
            reply_to_message_id: None,
            delivery: DeliveryState::Delivered,
        }
    }

    /// Whether the id was generated locally rather than assigned by the server.
    pub fn has_local_id(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX) || self.id.starts_with(PUSH_ID_PREFIX)
    }

    pub fn summary(&self) -> LastMessage {
        LastMessage {
            content: self.content.clone(),
            timestamp: self.created_at,
            sender_id: self.sender_id.clone(),
        }
    }
}

/// Denormalized summary of the newest message of a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    #[serde(with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
}

// --- Threads ---

/// Common surface of chat conversations and support tickets.
pub trait Thread: Clone + Send + Sync + DeserializeOwned + 'static {
    /// REST collection name (`/conversations`, `/tickets`).
    const RESOURCE: &'static str;

    fn id(&self) -> &str;
    /// The end-user party; recipient of staff messages.
    fn user_id(&self) -> &str;
    fn unread_count(&self) -> u32;
    fn set_unread_count(&mut self, count: u32);
    fn last_message(&self) -> Option<&LastMessage>;
    /// Replace the summary and move `updated_at` forward to its timestamp.
    fn set_last_message(&mut self, last: LastMessage);
    fn updated_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub professional_id: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(with = "flexible_timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(with = "flexible_timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

macro_rules! impl_thread {
    ($ty:ty, $resource:literal) => {
        impl Thread for $ty {
            const RESOURCE: &'static str = $resource;

            fn id(&self) -> &str {
                &self.id
            }

            fn user_id(&self) -> &str {
                &self.user_id
            }

            fn unread_count(&self) -> u32 {
                self.unread_count
            }

            fn set_unread_count(&mut self, count: u32) {
                self.unread_count = count;
            }

            fn last_message(&self) -> Option<&LastMessage> {
                self.last_message.as_ref()
            }

            fn set_last_message(&mut self, last: LastMessage) {
                if last.timestamp > self.updated_at {
                    self.updated_at = last.timestamp;
                }
                self.last_message = Some(last);
            }

            fn updated_at(&self) -> DateTime<Utc> {
                self.updated_at
            }
        }
    };
}

impl_thread!(Conversation, "conversations");
impl_thread!(Ticket, "tickets");

/// Timestamps arrive either as RFC3339 strings (REST) or as epoch
/// milliseconds (some socket payloads). Always serialized as RFC3339.
pub mod flexible_timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
            Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(D::Error::custom),
        }
    }
}
