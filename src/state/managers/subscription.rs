//! Delta-mode subscription state.
//!
//! Forward mapping (session -> handles it watches) and reverse mapping
//! (handle -> watching sessions). The reverse map is the delivery index for
//! `presence:<handle>` publishes; entitlement is re-checked at publish time,
//! so the maps are a candidate registry, not the privacy boundary.

use crate::state::session::SessionId;
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;

/// Subscription management state.
pub struct SubscriptionManager {
    /// Handles being watched by each session.
    pub subscriptions: DashMap<SessionId, DashSet<String>>,
    /// Reverse mapping - which sessions watch each handle.
    pub watchers: DashMap<String, DashSet<SessionId>>,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            watchers: DashMap::new(),
        }
    }

    /// Replace one session's subscription set, updating both maps.
    pub fn set_subscriptions(&self, session_id: &str, targets: HashSet<String>) {
        let previous: Vec<String> = self
            .subscriptions
            .get(session_id)
            .map(|set| set.iter().map(|h| h.clone()).collect())
            .unwrap_or_default();

        for handle in previous.iter().filter(|h| !targets.contains(*h)) {
            if let Some(watchers) = self.watchers.get(handle) {
                watchers.remove(session_id);
            }
            self.watchers.remove_if(handle, |_, set| set.is_empty());
        }

        let forward = DashSet::new();
        for handle in targets {
            self.watchers
                .entry(handle.clone())
                .or_default()
                .insert(session_id.to_string());
            forward.insert(handle);
        }
        self.subscriptions.insert(session_id.to_string(), forward);
    }

    /// Drop every subscription of a closing session.
    pub fn remove_session(&self, session_id: &str) {
        if let Some((_, targets)) = self.subscriptions.remove(session_id) {
            for handle in targets {
                if let Some(watchers) = self.watchers.get(&handle) {
                    watchers.remove(session_id);
                }
                self.watchers.remove_if(&handle, |_, set| set.is_empty());
            }
        }
    }

    /// Sessions currently watching a handle.
    pub fn watchers_of(&self, handle: &str) -> Vec<SessionId> {
        self.watchers
            .get(handle)
            .map(|set| set.iter().map(|id| id.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_subscriptions_diffs_both_maps() {
        let manager = SubscriptionManager::new();
        manager.set_subscriptions("s1", ["alice", "bob"].iter().map(|s| s.to_string()).collect());
        assert_eq!(manager.watchers_of("alice"), vec!["s1".to_string()]);

        manager.set_subscriptions("s1", ["bob", "carol"].iter().map(|s| s.to_string()).collect());
        assert!(manager.watchers_of("alice").is_empty());
        assert_eq!(manager.watchers_of("carol"), vec!["s1".to_string()]);
        assert_eq!(manager.watchers_of("bob"), vec!["s1".to_string()]);
    }

    #[test]
    fn remove_session_clears_reverse_entries() {
        let manager = SubscriptionManager::new();
        manager.set_subscriptions("s1", ["alice"].iter().map(|s| s.to_string()).collect());
        manager.set_subscriptions("s2", ["alice"].iter().map(|s| s.to_string()).collect());

        manager.remove_session("s1");
        assert_eq!(manager.watchers_of("alice"), vec!["s2".to_string()]);

        manager.remove_session("s2");
        assert!(manager.watchers_of("alice").is_empty());
        assert!(manager.watchers.is_empty());
    }
}
