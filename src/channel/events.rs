//! Typed events carried on the duplex channel
//!
//! Frames are JSON envelopes of the form `{"event": "...", "data": {...}}`.
//! Incoming message payloads reuse [`RawMessage`] so the `message`/`content`
//! normalization happens once, on receipt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::RawMessage;

/// Events emitted by the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage {
        sender: String,
        receiver: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Typing {
        sender: String,
        receiver: String,
        is_typing: bool,
    },
}

/// Events pushed by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Direct message addressed to the local user.
    ReceiveMessage(RawMessage),
    /// Delivery acknowledgment for the last send. Observability only.
    MessageSent { status: String },
    /// Full presence snapshot, sent on (re)connect and on churn.
    OnlineUsers(Vec<String>),
    /// Incremental presence: a peer came online.
    UserJoined(String),
    /// Typing indicator from a peer.
    UserTyping { sender: String, is_typing: bool },
    /// Server-side error. Logged; never tears down the session.
    Error { message: String },
}

impl ClientEvent {
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Decode one inbound frame.
pub fn parse_frame(text: &str) -> serde_json::Result<ServerEvent> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_receive_message_with_content_field() {
        let event = parse_frame(
            r#"{"event":"receive_message",
                "data":{"id":3,"sender":"bob","content":"hey",
                        "timestamp":"2024-05-01T12:00:00Z","is_bullying":false}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::ReceiveMessage(raw) => {
                let msg = raw.normalize("alice");
                assert_eq!(msg.body, "hey");
                assert_eq!(msg.sender, "bob");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parse_presence_events() {
        match parse_frame(r#"{"event":"online_users","data":["b","c"]}"#).unwrap() {
            ServerEvent::OnlineUsers(users) => assert_eq!(users, vec!["b", "c"]),
            other => panic!("unexpected event: {:?}", other),
        }
        match parse_frame(r#"{"event":"user_joined","data":"d"}"#).unwrap() {
            ServerEvent::UserJoined(user) => assert_eq!(user, "d"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn parse_typing_and_error() {
        match parse_frame(r#"{"event":"user_typing","data":{"sender":"b","is_typing":true}}"#)
            .unwrap()
        {
            ServerEvent::UserTyping { sender, is_typing } => {
                assert_eq!(sender, "b");
                assert!(is_typing);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match parse_frame(r#"{"event":"error","data":{"message":"boom"}}"#).unwrap() {
            ServerEvent::Error { message } => assert_eq!(message, "boom"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn send_message_frame_shape() {
        let event = ClientEvent::SendMessage {
            sender: "a".into(),
            receiver: "b".into(),
            message: "hi".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let frame = event.to_frame().unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["event"], "send_message");
        assert_eq!(v["data"]["receiver"], "b");
        assert_eq!(v["data"]["message"], "hi");
    }

    #[test]
    fn undecodable_frame_is_an_error() {
        assert!(parse_frame(r#"{"event":"no_such_event","data":{}}"#).is_err());
        assert!(parse_frame("not json").is_err());
    }
}
