//! Client-side state machine for a messaging session
//!
//! Everything here is mutated from one execution context (the channel event
//! loop), so there is no locking anywhere. [`ChatState`] wires the four
//! stateful components together and turns channel events and user intents
//! into state transitions plus UI-facing [`Update`]s.

pub mod conversations;
pub mod moderation;
pub mod presence;
pub mod typing;

pub use conversations::ConversationStore;
pub use moderation::{ModerationGate, SendPolicy};
pub use presence::PresenceTracker;
pub use typing::{PeerTyping, TypingCoordinator, TypingSignal};

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::channel::events::ServerEvent;
use crate::models::{ConversationSummary, Message};

/// Change notification for the UI surface.
#[derive(Debug)]
pub enum Update {
    MessageReceived {
        peer: String,
        shown_body: String,
        unread: u32,
        open: bool,
    },
    Delivered {
        status: String,
    },
    PresenceReplaced {
        online: usize,
    },
    PeerJoined {
        peer: String,
    },
    TypingChanged {
        peer: String,
        is_typing: bool,
    },
    ChannelError {
        message: String,
    },
}

/// Outcome of a compose intent.
pub enum Compose {
    /// Moderation gate closed; nothing is sent regardless of body content.
    Blocked,
    /// Empty body or no open conversation; silent no-op, no network call.
    Invalid,
    /// Optimistic entry recorded; dispatch to the channel in this order.
    Sent {
        start: Option<TypingSignal>,
        message: Message,
        stop: Option<TypingSignal>,
    },
}

pub struct ChatState {
    pub conversations: ConversationStore,
    pub presence: PresenceTracker,
    pub peer_typing: PeerTyping,
    pub typing: TypingCoordinator,
    pub moderation: ModerationGate,
}

impl ChatState {
    pub fn new(local_user: &str) -> Self {
        Self {
            conversations: ConversationStore::new(local_user),
            presence: PresenceTracker::new(local_user),
            peer_typing: PeerTyping::new(),
            typing: TypingCoordinator::new(),
            moderation: ModerationGate::new(),
        }
    }

    pub fn local_user(&self) -> &str {
        self.conversations.local_user()
    }

    /// Reset per-connection state after (re)connect: presence is invalid
    /// until a fresh snapshot arrives, typing flags are dropped, and the
    /// send policy and conversation previews come from fresh REST fetches.
    pub fn on_connect(&mut self, policy: SendPolicy, summaries: Vec<ConversationSummary>) {
        self.presence.invalidate();
        self.peer_typing.clear();
        self.moderation.refresh(policy);
        self.conversations.seed_summaries(summaries);
    }

    /// Apply one inbound channel event.
    pub fn apply_event(&mut self, event: ServerEvent, now: Instant) -> Vec<Update> {
        match event {
            ServerEvent::ReceiveMessage(raw) => {
                let msg = raw.normalize(self.local_user());
                let peer = msg.sender.clone();
                let shown_body = self.moderation.display_body(&msg).to_string();

                if !self.conversations.record_incoming(msg) {
                    return Vec::new();
                }
                // A delivered message implies the peer stopped typing.
                self.peer_typing.apply(&peer, false, now);

                let open = self.conversations.is_open(&peer);
                let unread = self.conversations.unread(&peer);
                vec![Update::MessageReceived {
                    peer,
                    shown_body,
                    unread,
                    open,
                }]
            }
            ServerEvent::MessageSent { status } => {
                tracing::debug!("Message delivered: {}", status);
                vec![Update::Delivered { status }]
            }
            ServerEvent::OnlineUsers(users) => {
                self.presence.apply_snapshot(users);
                vec![Update::PresenceReplaced {
                    online: self.presence.online_peers().len(),
                }]
            }
            ServerEvent::UserJoined(user) => {
                if self.presence.peer_joined(&user) {
                    vec![Update::PeerJoined { peer: user }]
                } else {
                    Vec::new()
                }
            }
            ServerEvent::UserTyping { sender, is_typing } => {
                if sender == self.local_user() {
                    return Vec::new();
                }
                self.peer_typing.apply(&sender, is_typing, now);
                vec![Update::TypingChanged {
                    peer: sender,
                    is_typing,
                }]
            }
            ServerEvent::Error { message } => {
                tracing::error!("Channel error: {}", message);
                vec![Update::ChannelError { message }]
            }
        }
    }

    /// Compose intent for the open conversation. Validation and the
    /// moderation gate live here; the channel layer only dispatches.
    ///
    /// With line-based input the keystroke burst and the submit arrive
    /// together, so the wire sequence collapses to start, message, stop.
    pub fn compose(&mut self, body: &str, sent_at: DateTime<Utc>, now: Instant) -> Compose {
        if !self.moderation.can_send() {
            return Compose::Blocked;
        }
        let peer = match self.conversations.open_peer() {
            Some(p) => p.to_string(),
            None => return Compose::Invalid,
        };
        if body.trim().is_empty() {
            return Compose::Invalid;
        }

        let start = self
            .typing
            .keystroke(&peer, now)
            .into_iter()
            .find(|s| s.is_typing);

        let message = match self.conversations.record_optimistic_send(body, sent_at) {
            Some(m) => m,
            None => return Compose::Invalid,
        };
        let stop = self.typing.cancel();

        Compose::Sent {
            start,
            message,
            stop,
        }
    }

    /// Open a peer's conversation. Returns the generation to tag the history
    /// refetch with, plus any typing-stop signal for the previous peer.
    pub fn open_conversation(&mut self, peer: &str) -> (u64, Option<TypingSignal>) {
        let stop = self.typing.cancel();
        (self.conversations.select_peer(peer), stop)
    }

    /// Close the open conversation, clearing its typing timer.
    pub fn close_conversation(&mut self) -> Option<TypingSignal> {
        self.conversations.close();
        self.typing.cancel()
    }

    /// Timer tick: expire the outbound debounce and inbound typing flags.
    pub fn tick(&mut self, now: Instant) -> (Option<TypingSignal>, Vec<String>) {
        (self.typing.poll_expired(now), self.peer_typing.prune(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> Instant {
        Instant::now()
    }

    fn sent_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn receive(sender: &str, body: &str) -> ServerEvent {
        crate::channel::events::parse_frame(&format!(
            r#"{{"event":"receive_message",
                "data":{{"id":"{}-{}","sender":"{}","message":"{}",
                         "timestamp":"2024-05-01T12:00:00Z"}}}}"#,
            sender, body, sender, body
        ))
        .unwrap()
    }

    #[test]
    fn incoming_message_scenario() {
        // B's store, open conversation is not "a".
        let mut state = ChatState::new("b");
        let updates = state.apply_event(receive("a", "hi"), now());

        assert_eq!(updates.len(), 1);
        match &updates[0] {
            Update::MessageReceived {
                peer,
                shown_body,
                unread,
                open,
            } => {
                assert_eq!(peer, "a");
                assert_eq!(shown_body, "hi");
                assert_eq!(*unread, 1);
                assert!(!open);
            }
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(state.conversations.messages("a")[0].body, "hi");
    }

    #[test]
    fn flagged_incoming_is_suppressed_in_update() {
        let mut state = ChatState::new("b");
        let event = crate::channel::events::parse_frame(
            r#"{"event":"receive_message",
                "data":{"id":1,"sender":"a","content":"mean words",
                        "timestamp":"2024-05-01T12:00:00Z",
                        "is_bullying":true,"bullying_probability":0.9}}"#,
        )
        .unwrap();
        match &state.apply_event(event, now())[0] {
            Update::MessageReceived { shown_body, .. } => {
                assert_eq!(shown_body, moderation::SUPPRESSED_BODY);
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn duplicate_delivery_produces_no_update() {
        let mut state = ChatState::new("b");
        assert_eq!(state.apply_event(receive("a", "hi"), now()).len(), 1);
        assert!(state.apply_event(receive("a", "hi"), now()).is_empty());
        assert_eq!(state.conversations.unread("a"), 1);
    }

    #[test]
    fn presence_snapshot_then_join() {
        let mut state = ChatState::new("a");
        let event = crate::channel::events::parse_frame(
            r#"{"event":"online_users","data":["b","c"]}"#,
        )
        .unwrap();
        state.apply_event(event, now());
        assert_eq!(state.presence.online_peers(), vec!["b", "c"]);

        let join =
            crate::channel::events::parse_frame(r#"{"event":"user_joined","data":"d"}"#).unwrap();
        assert_eq!(state.apply_event(join.clone(), now()).len(), 1);
        // Repeated join: no duplicates, no update.
        assert!(state.apply_event(join, now()).is_empty());
        assert_eq!(state.presence.online_peers(), vec!["b", "c", "d"]);
    }

    #[test]
    fn gate_closed_blocks_compose_regardless_of_body() {
        let mut state = ChatState::new("a");
        state.open_conversation("b");
        state.moderation.refresh(SendPolicy {
            can_send: false,
            flagged_count: 3,
            max_allowed: 3,
            notice: None,
        });
        assert!(matches!(
            state.compose("perfectly nice message", sent_at(), now()),
            Compose::Blocked
        ));
        assert!(state.conversations.messages("b").is_empty());
    }

    #[test]
    fn compose_validation_is_a_silent_noop() {
        let mut state = ChatState::new("a");
        assert!(matches!(state.compose("hi", sent_at(), now()), Compose::Invalid));

        state.open_conversation("b");
        assert!(matches!(state.compose("   ", sent_at(), now()), Compose::Invalid));
        assert!(state.conversations.messages("b").is_empty());
    }

    #[test]
    fn compose_emits_start_message_stop() {
        let mut state = ChatState::new("a");
        state.open_conversation("b");

        match state.compose("hi", sent_at(), now()) {
            Compose::Sent {
                start,
                message,
                stop,
            } => {
                let start = start.unwrap();
                assert!(start.is_typing);
                assert_eq!(start.receiver, "b");
                assert_eq!(message.body, "hi");
                assert_eq!(message.id, None);
                let stop = stop.unwrap();
                assert!(!stop.is_typing);
            }
            _ => panic!("expected Sent"),
        }
        assert_eq!(state.conversations.messages("b").len(), 1);
    }

    #[test]
    fn own_typing_echo_is_ignored() {
        let mut state = ChatState::new("a");
        let event = crate::channel::events::parse_frame(
            r#"{"event":"user_typing","data":{"sender":"a","is_typing":true}}"#,
        )
        .unwrap();
        assert!(state.apply_event(event, now()).is_empty());
    }

    #[test]
    fn incoming_message_clears_peer_typing() {
        let mut state = ChatState::new("b");
        let t = now();
        let typing = crate::channel::events::parse_frame(
            r#"{"event":"user_typing","data":{"sender":"a","is_typing":true}}"#,
        )
        .unwrap();
        state.apply_event(typing, t);
        assert!(state.peer_typing.is_typing("a", t));

        state.apply_event(receive("a", "done typing"), t);
        assert!(!state.peer_typing.is_typing("a", t));
    }

    #[test]
    fn on_connect_invalidates_presence_and_seeds() {
        let mut state = ChatState::new("a");
        let event = crate::channel::events::parse_frame(
            r#"{"event":"online_users","data":["b"]}"#,
        )
        .unwrap();
        state.apply_event(event, now());
        assert!(state.presence.is_online("b"));

        state.on_connect(
            SendPolicy::default(),
            vec![ConversationSummary {
                peer: "b".into(),
                unread: 2,
                last_message: Some("hey".into()),
                last_timestamp: None,
                is_online: true,
            }],
        );
        // Stale until the next snapshot.
        assert!(!state.presence.is_online("b"));
        assert_eq!(state.conversations.unread("b"), 2);
    }

    #[test]
    fn channel_error_does_not_disturb_state() {
        let mut state = ChatState::new("b");
        state.apply_event(receive("a", "hi"), now());
        let err = crate::channel::events::parse_frame(
            r#"{"event":"error","data":{"message":"rate limited"}}"#,
        )
        .unwrap();
        let updates = state.apply_event(err, now());
        assert!(matches!(updates[0], Update::ChannelError { .. }));
        assert_eq!(state.conversations.messages("a").len(), 1);
    }
}
