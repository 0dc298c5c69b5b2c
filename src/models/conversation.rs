//! Conversation summary models (peer-list previews)

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Conversation entry as returned by `GET /api/chat/conversations`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConversation {
    pub username: String,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message: Option<RawLastMessage>,
    #[serde(default)]
    pub is_online: bool,
}

/// Last-message preview; body field name varies like everywhere else.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLastMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Normalized per-peer summary used to seed the conversation store.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub peer: String,
    pub unread: u32,
    pub last_message: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub is_online: bool,
}

impl RawConversation {
    pub fn normalize(self) -> ConversationSummary {
        let (last_message, last_timestamp) = match self.last_message {
            Some(last) => (last.message.or(last.content), Some(last.timestamp)),
            None => (None, None),
        };
        ConversationSummary {
            peer: self.username,
            unread: self.unread_count,
            last_message,
            last_timestamp,
            is_online: self.is_online,
        }
    }
}
