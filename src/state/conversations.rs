//! Conversation store
//!
//! Keyed mapping from peer username to an ordered message sequence plus an
//! unread counter, reconciling REST-fetched history with live channel
//! events. Conversations are created lazily on first reference and live for
//! the duration of the session; nothing is cached across logout.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::{ConversationSummary, Message, MessageKey};

/// One peer's message sequence and preview metadata.
#[derive(Default)]
pub struct Conversation {
    messages: Vec<Message>,
    seen: HashSet<MessageKey>,
    unread: u32,
    pub last_message: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub peer_online_hint: bool,
}

impl Conversation {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    fn push(&mut self, msg: Message) {
        self.seen.insert(msg.key());
        self.update_summary(&msg);
        self.messages.push(msg);
    }

    fn update_summary(&mut self, msg: &Message) {
        self.last_message = Some(msg.body.clone());
        self.last_timestamp = Some(msg.sent_at);
    }
}

pub struct ConversationStore {
    local_user: String,
    open_peer: Option<String>,
    conversations: HashMap<String, Conversation>,
    /// Monotonic history-fetch generation per peer; stale responses from
    /// rapid peer switching are discarded against this.
    history_seq: HashMap<String, u64>,
}

impl ConversationStore {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            open_peer: None,
            conversations: HashMap::new(),
            history_seq: HashMap::new(),
        }
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    pub fn open_peer(&self) -> Option<&str> {
        self.open_peer.as_deref()
    }

    pub fn is_open(&self, peer: &str) -> bool {
        self.open_peer.as_deref() == Some(peer)
    }

    /// Open a conversation: resets its unread counter to zero and allocates
    /// the generation for the unconditional history refetch that follows
    /// (always refetch -- cached state may be stale after reconnect/relogin).
    pub fn select_peer(&mut self, peer: &str) -> u64 {
        self.open_peer = Some(peer.to_string());
        self.conversations.entry(peer.to_string()).or_default().unread = 0;
        self.next_history_seq(peer)
    }

    /// Close the open conversation (no unread reset).
    pub fn close(&mut self) {
        self.open_peer = None;
    }

    fn next_history_seq(&mut self, peer: &str) -> u64 {
        let seq = self.history_seq.entry(peer.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Record an incoming channel message under its sender's conversation.
    /// Increments unread unless that conversation is open. Returns false
    /// when the message is a redelivered duplicate (no state change).
    pub fn record_incoming(&mut self, msg: Message) -> bool {
        let peer = msg.sender.clone();
        let open = self.is_open(&peer);
        let conv = self.conversations.entry(peer.clone()).or_default();

        if conv.seen.contains(&msg.key()) {
            tracing::debug!("Dropping duplicate message from {}", peer);
            return false;
        }

        conv.push(msg);
        if !open {
            conv.unread += 1;
        }
        true
    }

    /// Append an unconfirmed entry to the open conversation before server
    /// acknowledgment, returning it for channel dispatch. `None` when
    /// validation fails (empty body or no open conversation) -- a silent
    /// no-op with no network call.
    pub fn record_optimistic_send(
        &mut self,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Option<Message> {
        let body = body.trim();
        if body.is_empty() {
            return None;
        }
        let peer = self.open_peer.clone()?;

        let msg = Message {
            id: None,
            sender: self.local_user.clone(),
            receiver: peer.clone(),
            body: body.to_string(),
            sent_at,
            is_flagged: false,
            flag_probability: 0.0,
            is_read: false,
        };

        let conv = self.conversations.entry(peer).or_default();
        conv.push(msg.clone());
        Some(msg)
    }

    /// Replace a conversation's sequence wholesale with a fetched history.
    /// `seq` must be the latest generation issued for the peer, otherwise
    /// the response is stale and discarded.
    pub fn apply_history(&mut self, peer: &str, seq: u64, messages: Vec<Message>) -> bool {
        if self.history_seq.get(peer).copied().unwrap_or(0) != seq {
            tracing::debug!(
                "Discarding stale history response for {} (generation {})",
                peer,
                seq
            );
            return false;
        }

        let conv = self.conversations.entry(peer.to_string()).or_default();
        conv.seen = messages.iter().map(Message::key).collect();
        if let Some(last) = messages.last() {
            conv.update_summary(last);
        }
        conv.messages = messages;
        true
    }

    /// Seed previews and unread counts from the REST conversation list
    /// (channel open). The open conversation's counter stays at zero.
    pub fn seed_summaries(&mut self, summaries: Vec<ConversationSummary>) {
        for summary in summaries {
            let open = self.is_open(&summary.peer);
            let conv = self.conversations.entry(summary.peer).or_default();
            conv.unread = if open { 0 } else { summary.unread };
            conv.last_message = summary.last_message;
            conv.last_timestamp = summary.last_timestamp;
            conv.peer_online_hint = summary.is_online;
        }
    }

    pub fn unread(&self, peer: &str) -> u32 {
        self.conversations.get(peer).map(|c| c.unread).unwrap_or(0)
    }

    pub fn messages(&self, peer: &str) -> &[Message] {
        self.conversations
            .get(peer)
            .map(|c| c.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, peer: &str) -> Option<&Conversation> {
        self.conversations.get(peer)
    }

    /// Peers with any state, sorted for display.
    pub fn peers(&self) -> Vec<&str> {
        let mut peers: Vec<&str> = self.conversations.keys().map(String::as_str).collect();
        peers.sort_unstable();
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, secs).unwrap()
    }

    fn incoming(id: &str, sender: &str, body: &str, secs: u32) -> Message {
        Message {
            id: Some(id.to_string()),
            sender: sender.to_string(),
            receiver: "me".to_string(),
            body: body.to_string(),
            sent_at: at(secs),
            is_flagged: false,
            flag_probability: 0.0,
            is_read: false,
        }
    }

    #[test]
    fn unread_counts_messages_while_closed() {
        let mut store = ConversationStore::new("me");
        for i in 0..3 {
            assert!(store.record_incoming(incoming(&i.to_string(), "a", "hi", i)));
        }
        assert_eq!(store.unread("a"), 3);
        assert_eq!(store.messages("a").len(), 3);
    }

    #[test]
    fn select_peer_resets_unread() {
        let mut store = ConversationStore::new("me");
        store.record_incoming(incoming("1", "a", "hi", 0));
        store.record_incoming(incoming("2", "a", "again", 1));
        assert_eq!(store.unread("a"), 2);

        store.select_peer("a");
        assert_eq!(store.unread("a"), 0);
        assert!(store.is_open("a"));
    }

    #[test]
    fn open_conversation_does_not_accumulate_unread() {
        let mut store = ConversationStore::new("b");
        store.select_peer("a");

        // A online, sends {sender:"a", receiver:"b", body:"hi"}.
        assert!(store.record_incoming(incoming("1", "a", "hi", 0)));
        assert_eq!(store.unread("a"), 0);
        assert_eq!(store.messages("a")[0].body, "hi");

        // Same message while some other conversation is open.
        let mut store = ConversationStore::new("b");
        store.select_peer("c");
        store.record_incoming(incoming("1", "a", "hi", 0));
        assert_eq!(store.unread("a"), 1);
    }

    #[test]
    fn duplicate_delivery_is_dropped() {
        let mut store = ConversationStore::new("me");
        assert!(store.record_incoming(incoming("1", "a", "hi", 0)));
        assert!(!store.record_incoming(incoming("1", "a", "hi", 0)));
        assert_eq!(store.unread("a"), 1);
        assert_eq!(store.messages("a").len(), 1);
    }

    #[test]
    fn duplicate_without_id_falls_back_to_content_identity() {
        let mut store = ConversationStore::new("me");
        let mut msg = incoming("x", "a", "hi", 0);
        msg.id = None;
        assert!(store.record_incoming(msg.clone()));
        assert!(!store.record_incoming(msg));
        assert_eq!(store.messages("a").len(), 1);
    }

    #[test]
    fn optimistic_send_requires_open_peer_and_body() {
        let mut store = ConversationStore::new("me");
        assert!(store.record_optimistic_send("hello", at(0)).is_none());

        store.select_peer("a");
        assert!(store.record_optimistic_send("   ", at(0)).is_none());

        let msg = store.record_optimistic_send("hello", at(0)).unwrap();
        assert_eq!(msg.id, None);
        assert_eq!(msg.sender, "me");
        assert_eq!(msg.receiver, "a");
        assert_eq!(store.messages("a").len(), 1);
        assert_eq!(store.get("a").unwrap().last_message.as_deref(), Some("hello"));
    }

    #[test]
    fn history_replaces_wholesale_and_reconciles_optimistic() {
        let mut store = ConversationStore::new("me");
        let seq = store.select_peer("a");
        store.record_optimistic_send("hello", at(0));

        // Server-confirmed copy of the optimistic entry plus an older one.
        let confirmed = vec![incoming("1", "a", "yo", 0), {
            let mut m = incoming("2", "me", "hello", 1);
            m.receiver = "a".to_string();
            m
        }];
        assert!(store.apply_history("a", seq, confirmed));
        assert_eq!(store.messages("a").len(), 2);
        assert_eq!(store.messages("a")[1].id.as_deref(), Some("2"));
    }

    #[test]
    fn empty_history_yields_empty_conversation() {
        let mut store = ConversationStore::new("me");
        let seq = store.select_peer("c");
        assert!(store.apply_history("c", seq, Vec::new()));
        assert!(store.messages("c").is_empty());
        assert_eq!(store.unread("c"), 0);
    }

    #[test]
    fn stale_history_response_is_discarded() {
        let mut store = ConversationStore::new("me");
        let first = store.select_peer("a");
        let second = store.select_peer("a");
        assert!(first < second);

        // The older in-flight response loses.
        assert!(!store.apply_history("a", first, vec![incoming("1", "a", "old", 0)]));
        assert!(store.messages("a").is_empty());

        assert!(store.apply_history("a", second, vec![incoming("2", "a", "new", 1)]));
        assert_eq!(store.messages("a")[0].body, "new");
    }

    #[test]
    fn summaries_seed_previews_but_not_open_unread() {
        let mut store = ConversationStore::new("me");
        store.select_peer("a");
        store.seed_summaries(vec![
            ConversationSummary {
                peer: "a".into(),
                unread: 4,
                last_message: Some("later".into()),
                last_timestamp: Some(at(5)),
                is_online: true,
            },
            ConversationSummary {
                peer: "b".into(),
                unread: 2,
                last_message: None,
                last_timestamp: None,
                is_online: false,
            },
        ]);

        assert_eq!(store.unread("a"), 0);
        assert_eq!(store.unread("b"), 2);
        assert_eq!(store.get("a").unwrap().last_message.as_deref(), Some("later"));
        assert_eq!(store.peers(), vec!["a", "b"]);
    }
}
