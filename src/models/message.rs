//! Message models and wire normalization
//!
//! The server is inconsistent about the body field (`message` vs `content`)
//! and sends ids as either strings or numbers. Both quirks are resolved here,
//! at the wire boundary; everything downstream sees the canonical [`Message`].

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Serialize};

/// Canonical direct message, owned by the conversation store.
///
/// Optimistic entries (locally created, unconfirmed) have no `id`; they are
/// never removed, only reconciled away by a later full-history fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<String>,
    pub sender: String,
    pub receiver: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub is_flagged: bool,
    pub flag_probability: f64,
    pub is_read: bool,
}

impl Message {
    /// Deduplication identity: server id when assigned, content triple otherwise.
    pub fn key(&self) -> MessageKey {
        match self.id {
            Some(ref id) => MessageKey::Id(id.clone()),
            None => MessageKey::Content {
                sender: self.sender.clone(),
                sent_at_ms: self.sent_at.timestamp_millis(),
                body: self.body.clone(),
            },
        }
    }
}

/// Identity used to deduplicate redelivered channel messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Id(String),
    Content {
        sender: String,
        sent_at_ms: i64,
        body: String,
    },
}

/// Message as the server actually sends it, REST and channel alike.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    pub sender: String,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_bullying: Option<bool>,
    #[serde(default)]
    pub bullying_probability: Option<f64>,
    #[serde(default)]
    pub is_read: Option<bool>,
}

impl RawMessage {
    /// Normalize into the canonical shape. Channel deliveries omit the
    /// receiver (it is always us), so the local username fills the gap.
    pub fn normalize(self, local_user: &str) -> Message {
        let body = self.message.or(self.content).unwrap_or_default();
        Message {
            id: self.id,
            sender: self.sender,
            receiver: self.receiver.unwrap_or_else(|| local_user.to_string()),
            body,
            sent_at: self.timestamp,
            is_flagged: self.is_bullying.unwrap_or(false),
            flag_probability: self.bullying_probability.unwrap_or(0.0),
            is_read: self.is_read.unwrap_or(false),
        }
    }
}

/// Accept a message id as a string, an integer, or null.
fn opt_string_or_number<'de, D: de::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<String>, D::Error> {
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<String>;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("string, integer, or null")
        }
        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }
    }
    d.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prefers_message_over_content() {
        let raw: RawMessage = serde_json::from_str(
            r#"{"id":7,"sender":"bob","message":"hi","content":"stale",
                "timestamp":"2024-05-01T12:00:00Z"}"#,
        )
        .unwrap();
        let msg = raw.normalize("alice");
        assert_eq!(msg.body, "hi");
        assert_eq!(msg.id.as_deref(), Some("7"));
        assert_eq!(msg.receiver, "alice");
        assert!(!msg.is_flagged);
    }

    #[test]
    fn normalize_falls_back_to_content() {
        let raw: RawMessage = serde_json::from_str(
            r#"{"id":"abc","sender":"bob","receiver":"alice","content":"hello",
                "timestamp":"2024-05-01T12:00:00Z","is_bullying":true,
                "bullying_probability":0.92,"is_read":true}"#,
        )
        .unwrap();
        let msg = raw.normalize("alice");
        assert_eq!(msg.body, "hello");
        assert_eq!(msg.id.as_deref(), Some("abc"));
        assert!(msg.is_flagged);
        assert!((msg.flag_probability - 0.92).abs() < 1e-9);
        assert!(msg.is_read);
    }

    #[test]
    fn key_uses_server_id_when_present() {
        let raw: RawMessage = serde_json::from_str(
            r#"{"id":42,"sender":"bob","message":"x","timestamp":"2024-05-01T12:00:00Z"}"#,
        )
        .unwrap();
        let msg = raw.normalize("alice");
        assert_eq!(msg.key(), MessageKey::Id("42".into()));
    }

    #[test]
    fn key_falls_back_to_content_triple() {
        let raw: RawMessage = serde_json::from_str(
            r#"{"sender":"bob","message":"x","timestamp":"2024-05-01T12:00:00Z"}"#,
        )
        .unwrap();
        let msg = raw.normalize("alice");
        match msg.key() {
            MessageKey::Content { sender, body, .. } => {
                assert_eq!(sender, "bob");
                assert_eq!(body, "x");
            }
            other => panic!("unexpected key: {:?}", other),
        }
    }
}
