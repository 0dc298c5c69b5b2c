//! Presence tracker
//!
//! Wholly event-driven: the online set is derived from channel events and
//! never from REST. After a reconnect the set is invalid until a fresh
//! snapshot arrives, so `invalidate` clears it and marks it stale.

use std::collections::HashSet;

pub struct PresenceTracker {
    local_user: String,
    online: HashSet<String>,
    fresh: bool,
}

impl PresenceTracker {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            online: HashSet::new(),
            fresh: false,
        }
    }

    /// Replace the online set from a server snapshot. The local user is
    /// always excluded.
    pub fn apply_snapshot(&mut self, users: Vec<String>) {
        self.online = users
            .into_iter()
            .filter(|u| *u != self.local_user)
            .collect();
        self.fresh = true;
    }

    /// A peer came online. Idempotent; the local user is excluded.
    /// Returns true when the peer was not already present.
    pub fn peer_joined(&mut self, user: &str) -> bool {
        if user == self.local_user {
            return false;
        }
        self.online.insert(user.to_string())
    }

    /// Mark the set stale (connection dropped). Everyone reads as offline
    /// until the next snapshot.
    pub fn invalidate(&mut self) {
        self.online.clear();
        self.fresh = false;
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Online/offline for a username. Anyone not in the set is offline.
    pub fn is_online(&self, user: &str) -> bool {
        self.fresh && self.online.contains(user)
    }

    /// Sorted list of online peers, for display.
    pub fn online_peers(&self) -> Vec<&str> {
        let mut peers: Vec<&str> = self.online.iter().map(String::as_str).collect();
        peers.sort_unstable();
        peers
    }
}
