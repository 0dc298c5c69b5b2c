//! Moderation gate
//!
//! Two independent mechanisms: `SendPolicy` gates the local user's outbound
//! sends (refreshed from REST on channel open; the server re-validates, the
//! client check is an optimization, not the authority), and per-message
//! display suppression driven by the classifier flag attached to each
//! message, togglable per message by the viewer.

use std::collections::HashSet;

use crate::models::{Message, MessageKey};

/// Placeholder shown instead of a flagged message body.
pub const SUPPRESSED_BODY: &str = "******";

/// Send-eligibility for the local user, from `GET /api/chat/can-chat`.
#[derive(Debug, Clone, PartialEq)]
pub struct SendPolicy {
    pub can_send: bool,
    pub flagged_count: u32,
    pub max_allowed: u32,
    pub notice: Option<String>,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            can_send: true,
            flagged_count: 0,
            max_allowed: 0,
            notice: None,
        }
    }
}

/// Body to display for a message, honoring suppression.
pub fn display_body(msg: &Message, revealed: bool) -> &str {
    if msg.is_flagged && !revealed {
        SUPPRESSED_BODY
    } else {
        &msg.body
    }
}

/// Per-user send gate plus per-message reveal state.
#[derive(Default)]
pub struct ModerationGate {
    policy: SendPolicy,
    revealed: HashSet<MessageKey>,
}

impl ModerationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the send policy (on channel/session open).
    pub fn refresh(&mut self, policy: SendPolicy) {
        if !policy.can_send {
            tracing::warn!(
                "Sending blocked: {}/{} flagged messages",
                policy.flagged_count,
                policy.max_allowed
            );
        }
        self.policy = policy;
    }

    pub fn policy(&self) -> &SendPolicy {
        &self.policy
    }

    pub fn can_send(&self) -> bool {
        self.policy.can_send
    }

    /// Toggle reveal for one message; returns whether it is now revealed.
    pub fn toggle_reveal(&mut self, key: MessageKey) -> bool {
        if self.revealed.remove(&key) {
            false
        } else {
            self.revealed.insert(key);
            true
        }
    }

    pub fn is_revealed(&self, key: &MessageKey) -> bool {
        self.revealed.contains(key)
    }

    /// Body to display for a message under the current reveal state.
    pub fn display_body<'a>(&self, msg: &'a Message) -> &'a str {
        display_body(msg, self.is_revealed(&msg.key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn flagged_message() -> Message {
        Message {
            id: Some("9".into()),
            sender: "bob".into(),
            receiver: "alice".into(),
            body: "something nasty".into(),
            sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            is_flagged: true,
            flag_probability: 0.97,
            is_read: false,
        }
    }

    #[test]
    fn flagged_body_suppressed_by_default_and_toggles() {
        let mut gate = ModerationGate::new();
        let msg = flagged_message();

        assert_eq!(gate.display_body(&msg), SUPPRESSED_BODY);

        assert!(gate.toggle_reveal(msg.key()));
        assert_eq!(gate.display_body(&msg), "something nasty");

        assert!(!gate.toggle_reveal(msg.key()));
        assert_eq!(gate.display_body(&msg), SUPPRESSED_BODY);
    }

    #[test]
    fn clean_body_never_suppressed() {
        let gate = ModerationGate::new();
        let mut msg = flagged_message();
        msg.is_flagged = false;
        assert_eq!(gate.display_body(&msg), "something nasty");
    }

    #[test]
    fn policy_refresh_gates_sending() {
        let mut gate = ModerationGate::new();
        assert!(gate.can_send());

        gate.refresh(SendPolicy {
            can_send: false,
            flagged_count: 5,
            max_allowed: 3,
            notice: Some("blocked".into()),
        });
        assert!(!gate.can_send());
        assert_eq!(gate.policy().flagged_count, 5);

        // Reveal state is independent of the send gate.
        let msg = flagged_message();
        assert!(gate.toggle_reveal(msg.key()));
        assert_eq!(gate.display_body(&msg), "something nasty");
    }
}
