//! Typing indicators, both directions
//!
//! Outbound: a per-open-peer state machine (idle -> typing -> idle) with a
//! 2-second debounce timer reset on every keystroke. Inbound: per-peer flags
//! that self-expire 3 seconds after the last renewal, a guard against missed
//! stop signals. All timers are deadline-based and driven by the event loop's
//! tick, so nothing here touches the clock directly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Keystroke silence after which an outbound typing-stop is emitted.
pub const OUTBOUND_IDLE: Duration = Duration::from_secs(2);

/// Inbound typing flags clear this long after the last renewal.
pub const INBOUND_EXPIRY: Duration = Duration::from_secs(3);

/// A typing signal to emit on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub receiver: String,
    pub is_typing: bool,
}

struct ActiveTyping {
    peer: String,
    deadline: Instant,
}

/// Outbound debounced typing-state broadcaster for the open conversation.
#[derive(Default)]
pub struct TypingCoordinator {
    active: Option<ActiveTyping>,
}

impl TypingCoordinator {
    pub fn new() -> Self {
        Self { active: None }
    }

    /// First keystroke after idle emits a start signal; further keystrokes
    /// only push the debounce deadline. Switching peers stops the old
    /// conversation's indicator and starts the new one.
    pub fn keystroke(&mut self, peer: &str, now: Instant) -> Vec<TypingSignal> {
        let deadline = now + OUTBOUND_IDLE;

        match self.active {
            Some(ref mut active) if active.peer == peer => {
                active.deadline = deadline;
                Vec::new()
            }
            Some(_) => {
                let mut signals = Vec::with_capacity(2);
                if let Some(stop) = self.cancel() {
                    signals.push(stop);
                }
                self.active = Some(ActiveTyping {
                    peer: peer.to_string(),
                    deadline,
                });
                signals.push(TypingSignal {
                    receiver: peer.to_string(),
                    is_typing: true,
                });
                signals
            }
            None => {
                self.active = Some(ActiveTyping {
                    peer: peer.to_string(),
                    deadline,
                });
                vec![TypingSignal {
                    receiver: peer.to_string(),
                    is_typing: true,
                }]
            }
        }
    }

    /// Emit a stop signal if the debounce deadline has passed.
    pub fn poll_expired(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.active {
            Some(ref active) if now >= active.deadline => self.cancel(),
            _ => None,
        }
    }

    /// Transition to idle immediately (message sent, conversation closed,
    /// or teardown), emitting the stop signal if we were typing.
    pub fn cancel(&mut self) -> Option<TypingSignal> {
        self.active.take().map(|active| TypingSignal {
            receiver: active.peer,
            is_typing: false,
        })
    }

    pub fn is_typing(&self) -> bool {
        self.active.is_some()
    }
}

/// Inbound per-peer typing flags with self-expiring entries.
#[derive(Default)]
pub struct PeerTyping {
    deadlines: HashMap<String, Instant>,
}

impl PeerTyping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a typing signal from a peer. A renewal pushes the expiry out;
    /// an explicit stop clears immediately.
    pub fn apply(&mut self, sender: &str, is_typing: bool, now: Instant) {
        if is_typing {
            self.deadlines
                .insert(sender.to_string(), now + INBOUND_EXPIRY);
        } else {
            self.deadlines.remove(sender);
        }
    }

    /// Clear expired flags, returning the peers whose typing state changed.
    pub fn prune(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &expired {
            self.deadlines.remove(peer);
        }
        expired
    }

    pub fn is_typing(&self, peer: &str, now: Instant) -> bool {
        self.deadlines
            .get(peer)
            .map(|deadline| now < *deadline)
            .unwrap_or(false)
    }

    /// Drop all flags (conversation close or teardown).
    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}
