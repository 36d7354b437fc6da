//! Session state types with typestate admission.
//!
//! A connection starts as a [`PendingSession`] (socket accepted, awaiting the
//! `login` frame) and is consumed by [`PendingSession::admit`] into a
//! [`LiveSession`]. Fields a handler needs after admission - handle, user row
//! id, preferences - are guaranteed present on `LiveSession`, not `Option`s.
//!
//! Within `Live`, a session whose `is_alive` flag was cleared by the last
//! heartbeat sweep and not restored by a client `hb` is a zombie; the next
//! sweep reaps it.

use glimpse_proto::{Activity, Preferences};
use std::collections::HashSet;
use std::net::SocketAddr;

/// Unique id of one connected window.
pub type SessionId = String;

/// Identity-provider record attached to an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityInfo {
    /// Stable numeric id at the provider.
    pub id: i64,
    /// Provider login; becomes the session handle.
    pub login: String,
    /// Avatar URL.
    pub avatar: Option<String>,
}

/// The live presence fields one window reports.
#[derive(Debug, Clone)]
pub struct SessionPresence {
    /// Display status string.
    pub status: String,
    /// Current activity.
    pub activity: Activity,
    /// Current project, if any.
    pub project: Option<String>,
    /// Current language, if any.
    pub language: Option<String>,
    /// Milliseconds of the last `statusUpdate`, for aggregation tie-breaks.
    pub updated_at: i64,
}

impl SessionPresence {
    /// Presence right after admission.
    pub fn initial(now_ms: i64) -> Self {
        Self {
            status: "Online".to_string(),
            activity: Activity::Idle,
            project: None,
            language: None,
            updated_at: now_ms,
        }
    }
}

/// A connection that has not yet sent its `login` frame.
#[derive(Debug)]
pub struct PendingSession {
    /// Peer address, for rate limiting and logs.
    pub addr: SocketAddr,
    /// Unix seconds the socket was accepted.
    pub connected_at: i64,
}

impl PendingSession {
    /// Create pending state for a freshly accepted socket.
    pub fn new(addr: SocketAddr, connected_at: i64) -> Self {
        Self { addr, connected_at }
    }

    /// Consume the pending state into a live session.
    ///
    /// Everything the seed carries was already committed to the store by the
    /// admission path; the in-memory session is constructed last so a store
    /// failure never leaves a half-admitted session behind.
    pub fn admit(self, seed: AdmissionSeed) -> LiveSession {
        LiveSession {
            session_id: seed.session_id,
            handle: seed.handle,
            resolved_handle: seed.resolved_handle,
            user_row_id: seed.user_row_id,
            identity: seed.identity,
            followers: seed.followers,
            following: seed.following,
            close_friends: seed.close_friends,
            prefs: seed.prefs,
            avatar: seed.avatar,
            presence: SessionPresence::initial(seed.now_ms),
            addr: self.addr,
            connected_at: self.connected_at,
            is_alive: true,
            last_heartbeat: seed.now_ms,
            resumed: seed.resumed,
        }
    }
}

/// Everything admission resolved before constructing the session.
#[derive(Debug)]
pub struct AdmissionSeed {
    pub session_id: SessionId,
    pub handle: String,
    pub resolved_handle: String,
    pub user_row_id: i64,
    pub identity: Option<IdentityInfo>,
    pub followers: Vec<i64>,
    pub following: Vec<i64>,
    pub close_friends: HashSet<i64>,
    pub prefs: Preferences,
    pub avatar: Option<String>,
    pub now_ms: i64,
    pub resumed: bool,
}

/// A fully admitted session. One per connected window; many may share a
/// handle. Mutable fields are owned by the session manager; everything else
/// reads them through collapsed aggregate snapshots.
#[derive(Debug, Clone)]
pub struct LiveSession {
    /// Unique per window.
    pub session_id: SessionId,
    /// Public handle (identity login or guest string).
    pub handle: String,
    /// Canonical handle after alias resolution.
    pub resolved_handle: String,
    /// Row id in the users table.
    pub user_row_id: i64,
    /// Identity record when authenticated; `None` for guests.
    pub identity: Option<IdentityInfo>,
    /// Identity ids following this user (first page, bounded).
    pub followers: Vec<i64>,
    /// Identity ids this user follows (first page, bounded).
    pub following: Vec<i64>,
    /// Identity ids pinned as close friends.
    pub close_friends: HashSet<i64>,
    /// Visibility preferences snapshot.
    pub prefs: Preferences,
    /// Stable avatar.
    pub avatar: Option<String>,
    /// Live presence fields.
    pub presence: SessionPresence,
    /// Peer address.
    pub addr: SocketAddr,
    /// Unix seconds the socket was accepted.
    pub connected_at: i64,
    /// Cleared by each heartbeat sweep; restored by a client `hb`.
    pub is_alive: bool,
    /// Milliseconds of the last client `hb`.
    pub last_heartbeat: i64,
    /// Whether this session was silently resumed (no come-online emitted).
    pub resumed: bool,
}

impl LiveSession {
    /// Identity id, if authenticated.
    #[inline]
    pub fn identity_id(&self) -> Option<i64> {
        self.identity.as_ref().map(|i| i.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(handle: &str) -> AdmissionSeed {
        AdmissionSeed {
            session_id: "s1".to_string(),
            handle: handle.to_string(),
            resolved_handle: handle.to_string(),
            user_row_id: 1,
            identity: None,
            followers: Vec::new(),
            following: Vec::new(),
            close_friends: HashSet::new(),
            prefs: Preferences::default(),
            avatar: None,
            now_ms: 1_000,
            resumed: false,
        }
    }

    #[test]
    fn admission_yields_live_defaults() {
        let pending = PendingSession::new("127.0.0.1:9000".parse().unwrap(), 1);
        let live = pending.admit(seed("alice"));
        assert_eq!(live.handle, "alice");
        assert!(live.is_alive);
        assert_eq!(live.presence.activity, Activity::Idle);
        assert_eq!(live.presence.status, "Online");
        assert!(!live.resumed);
    }

    #[test]
    fn resumed_flag_carries_through() {
        let pending = PendingSession::new("127.0.0.1:9000".parse().unwrap(), 1);
        let mut s = seed("alice");
        s.resumed = true;
        assert!(pending.admit(s).resumed);
    }
}
