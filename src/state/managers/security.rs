//! Rate limiting for admission and message flood protection.
//!
//! Sliding-minute counters: connection attempts keyed by peer address,
//! messages keyed by user handle. A check records the attempt when allowed;
//! entries older than the window fall out on the next check, and whole idle
//! keys are reaped by a periodic maintenance task. Exact accuracy under
//! contention is not required; each key's window is guarded by its own map
//! shard.

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use std::net::IpAddr;

/// Window length for both counters.
const WINDOW_MS: i64 = 60_000;

/// Idle keys older than this are dropped by [`RateLimitManager::cleanup`].
const REAP_AFTER_MS: i64 = 120_000;

/// Thread-safe sliding-window rate limit manager.
pub struct RateLimitManager {
    /// Per-address connection attempt timestamps (milliseconds).
    connection_windows: DashMap<IpAddr, Vec<i64>>,
    /// Per-handle message timestamps (milliseconds).
    message_windows: DashMap<String, Vec<i64>>,
    /// Configured limits.
    config: RateLimitConfig,
}

impl RateLimitManager {
    /// Create a new rate limit manager with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            connection_windows: DashMap::new(),
            message_windows: DashMap::new(),
            config,
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn check(window: &mut Vec<i64>, now_ms: i64, limit: u32) -> bool {
        window.retain(|ts| now_ms - *ts < WINDOW_MS);
        if window.len() < limit as usize {
            window.push(now_ms);
            true
        } else {
            false
        }
    }

    /// Check whether a peer address may open another connection.
    pub fn check_connection(&self, addr: IpAddr) -> bool {
        self.check_connection_at(addr, Self::now_ms())
    }

    /// Clock-injected variant of [`Self::check_connection`].
    pub fn check_connection_at(&self, addr: IpAddr, now_ms: i64) -> bool {
        let mut window = self.connection_windows.entry(addr).or_default();
        Self::check(&mut window, now_ms, self.config.connections_per_minute)
    }

    /// Check whether a user may send another frame.
    pub fn check_message(&self, handle: &str) -> bool {
        self.check_message_at(handle, Self::now_ms())
    }

    /// Clock-injected variant of [`Self::check_message`].
    pub fn check_message_at(&self, handle: &str, now_ms: i64) -> bool {
        let mut window = self
            .message_windows
            .entry(handle.to_string())
            .or_default();
        Self::check(&mut window, now_ms, self.config.messages_per_minute)
    }

    /// Drop keys with no activity in the reap window. Called periodically
    /// from the maintenance task.
    pub fn cleanup(&self) {
        self.cleanup_at(Self::now_ms());
    }

    /// Clock-injected variant of [`Self::cleanup`].
    pub fn cleanup_at(&self, now_ms: i64) {
        self.connection_windows
            .retain(|_, window| window.iter().any(|ts| now_ms - *ts < REAP_AFTER_MS));
        self.message_windows
            .retain(|_, window| window.iter().any(|ts| now_ms - *ts < REAP_AFTER_MS));
    }

    /// Number of tracked keys, for metrics.
    pub fn tracked_keys(&self) -> usize {
        self.connection_windows.len() + self.message_windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RateLimitManager {
        RateLimitManager::new(RateLimitConfig {
            connections_per_minute: 5,
            messages_per_minute: 60,
        })
    }

    #[test]
    fn sixth_connection_in_a_minute_is_rejected() {
        let manager = manager();
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        for i in 0..5 {
            assert!(manager.check_connection_at(ip, i));
        }
        assert!(!manager.check_connection_at(ip, 10));
    }

    #[test]
    fn sixty_first_message_rejected_first_of_next_minute_accepted() {
        let manager = manager();
        for i in 0..60 {
            assert!(manager.check_message_at("alice", i), "message {i}");
        }
        assert!(!manager.check_message_at("alice", 59_999));
        // The window slides: one minute after the first message, room opens.
        assert!(manager.check_message_at("alice", 60_000));
    }

    #[test]
    fn keys_are_independent() {
        let manager = manager();
        for i in 0..60 {
            manager.check_message_at("alice", i);
        }
        assert!(!manager.check_message_at("alice", 100));
        assert!(manager.check_message_at("bob", 100));
    }

    #[test]
    fn cleanup_reaps_idle_keys_only() {
        let manager = manager();
        manager.check_message_at("alice", 0);
        manager.check_message_at("bob", 110_000);
        manager.cleanup_at(125_000);
        assert_eq!(manager.tracked_keys(), 1);
    }
}
