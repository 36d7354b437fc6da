//! Session table management.
//!
//! The `SessionManager` owns the hot session table: every admission and close
//! writes it, every broadcast reads it. Broadcasts work from owned snapshots
//! collected before any await so they never observe a session mid-update.

use crate::state::session::{LiveSession, SessionId, SessionPresence};
use dashmap::{DashMap, DashSet};
use glimpse_proto::{Activity, DeltaFrame, ServerFrame};
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound traffic to one connection task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Full frame tagged with `type`.
    Server(ServerFrame),
    /// Compact frame tagged with `t`.
    Delta(DeltaFrame),
    /// Close the socket with the given WebSocket close code.
    Close {
        code: u16,
        reason: String,
    },
}

/// Queue depth per session before sends start dropping. A session this far
/// behind is effectively dead and the heartbeat sweep will reap it.
const OUTBOUND_QUEUE: usize = 64;

/// Result of one heartbeat sweep pass.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Sessions that missed two consecutive pings, with their handles.
    pub dead: Vec<(SessionId, String)>,
    /// Sessions pinged this pass.
    pub pinged: usize,
}

/// Thread-safe session table with a per-handle index.
pub struct SessionManager {
    /// All live sessions, keyed by session id.
    pub sessions: DashMap<SessionId, LiveSession>,
    /// Session ids per handle. Multiple windows share one handle.
    pub by_handle: DashMap<String, DashSet<SessionId>>,
    /// Outbound queues, registered at admission.
    senders: DashMap<SessionId, mpsc::Sender<Outbound>>,
}

impl SessionManager {
    /// Create an empty session table.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_handle: DashMap::new(),
            senders: DashMap::new(),
        }
    }

    /// Standard outbound channel for a new connection.
    pub fn channel() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(OUTBOUND_QUEUE)
    }

    /// Register a freshly admitted session and its outbound queue.
    pub fn insert(&self, session: LiveSession, sender: mpsc::Sender<Outbound>) {
        let id = session.session_id.clone();
        let handle = session.handle.clone();
        self.senders.insert(id.clone(), sender);
        self.by_handle
            .entry(handle)
            .or_default()
            .insert(id.clone());
        self.sessions.insert(id, session);
    }

    /// Remove a session, returning it if it was present. Idempotent; the
    /// heartbeat sweep and the socket close path may race here.
    pub fn remove(&self, session_id: &str) -> Option<LiveSession> {
        self.senders.remove(session_id);
        let (_, session) = self.sessions.remove(session_id)?;
        if let Some(set) = self.by_handle.get(&session.handle) {
            set.remove(session_id);
        }
        self.by_handle
            .remove_if(&session.handle, |_, set| set.is_empty());
        Some(session)
    }

    /// Whether a handle has at least one live session.
    pub fn has_sessions(&self, handle: &str) -> bool {
        self.by_handle
            .get(handle)
            .is_some_and(|set| !set.is_empty())
    }

    /// Session ids currently attached to a handle.
    pub fn ids_of(&self, handle: &str) -> Vec<SessionId> {
        self.by_handle
            .get(handle)
            .map(|set| set.iter().map(|id| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Owned snapshot of every live session, for broadcast building.
    pub fn snapshot(&self) -> Vec<LiveSession> {
        self.sessions.iter().map(|s| s.clone()).collect()
    }

    /// Owned snapshot of one handle's sessions.
    pub fn snapshot_of(&self, handle: &str) -> Vec<LiveSession> {
        self.ids_of(handle)
            .into_iter()
            .filter_map(|id| self.sessions.get(&id).map(|s| s.clone()))
            .collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Number of distinct handles with live sessions.
    pub fn online_handles(&self) -> usize {
        self.by_handle.len()
    }

    /// Apply a presence patch to one session. Returns the session's handle
    /// when something changed.
    pub fn update_presence(
        &self,
        session_id: &str,
        status: Option<String>,
        activity: Option<Activity>,
        project: Option<String>,
        language: Option<String>,
        now_ms: i64,
    ) -> Option<String> {
        let mut session = self.sessions.get_mut(session_id)?;
        let presence: &mut SessionPresence = &mut session.presence;
        if let Some(status) = status {
            presence.status = status;
        }
        if let Some(activity) = activity {
            presence.activity = activity;
        }
        if let Some(project) = project {
            presence.project = Some(project);
        }
        if let Some(language) = language {
            presence.language = Some(language);
        }
        presence.updated_at = now_ms;
        Some(session.handle.clone())
    }

    /// Run `f` against every session of a handle (preference or close-friend
    /// refresh after a store write).
    pub fn for_each_of_handle(&self, handle: &str, mut f: impl FnMut(&mut LiveSession)) {
        for id in self.ids_of(handle) {
            if let Some(mut session) = self.sessions.get_mut(&id) {
                f(&mut session);
            }
        }
    }

    /// Restore liveness after a client `hb`.
    pub fn mark_alive(&self, session_id: &str, now_ms: i64) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.is_alive = true;
            session.last_heartbeat = now_ms;
        }
    }

    /// One heartbeat sweep: sessions already flagged dead are collected for
    /// reaping, everyone else is flagged and pinged.
    ///
    /// The ping sends use `try_send`; a session whose queue is full is as
    /// good as dead and will fail the next sweep anyway.
    pub fn sweep(&self, now_ms: i64) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let mut to_ping: Vec<SessionId> = Vec::new();

        for mut entry in self.sessions.iter_mut() {
            if entry.is_alive {
                entry.is_alive = false;
                to_ping.push(entry.session_id.clone());
            } else {
                outcome
                    .dead
                    .push((entry.session_id.clone(), entry.handle.clone()));
            }
        }

        for id in to_ping {
            if let Some(sender) = self.senders.get(&id) {
                let _ = sender.try_send(Outbound::Delta(DeltaFrame::Hb {
                    ts: now_ms,
                    ack: None,
                }));
                outcome.pinged += 1;
            }
        }

        outcome
    }

    /// Send a frame to one session. Errors are dropped; a full or closed
    /// queue means the connection is on its way out.
    pub fn send_to_session(&self, session_id: &str, frame: Outbound) {
        if let Some(sender) = self.senders.get(session_id) {
            if sender.try_send(frame).is_err() {
                debug!(session_id = %session_id, "outbound queue full or closed, frame dropped");
            }
        }
    }

    /// Send a frame to every session of a handle, optionally excluding one
    /// (chat echo to the sender's other windows).
    pub fn send_to_handle(&self, handle: &str, frame: &Outbound, exclude: Option<&str>) {
        for id in self.ids_of(handle) {
            if exclude.is_some_and(|ex| ex == id) {
                continue;
            }
            self.send_to_session(&id, frame.clone());
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::{AdmissionSeed, PendingSession};
    use glimpse_proto::Preferences;
    use std::collections::HashSet;

    fn live(session_id: &str, handle: &str) -> LiveSession {
        PendingSession::new("127.0.0.1:1".parse().unwrap(), 0).admit(AdmissionSeed {
            session_id: session_id.to_string(),
            handle: handle.to_string(),
            resolved_handle: handle.to_string(),
            user_row_id: 1,
            identity: None,
            followers: Vec::new(),
            following: Vec::new(),
            close_friends: HashSet::new(),
            prefs: Preferences::default(),
            avatar: None,
            now_ms: 0,
            resumed: false,
        })
    }

    #[test]
    fn multiple_sessions_share_a_handle() {
        let manager = SessionManager::new();
        let (tx, _rx1) = SessionManager::channel();
        manager.insert(live("s1", "alice"), tx);
        let (tx, _rx2) = SessionManager::channel();
        manager.insert(live("s2", "alice"), tx);

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.online_handles(), 1);
        assert!(manager.has_sessions("alice"));
        assert_eq!(manager.snapshot_of("alice").len(), 2);
    }

    #[test]
    fn remove_is_idempotent_and_clears_the_index() {
        let manager = SessionManager::new();
        let (tx, _rx) = SessionManager::channel();
        manager.insert(live("s1", "alice"), tx);

        assert!(manager.remove("s1").is_some());
        assert!(manager.remove("s1").is_none());
        assert!(!manager.has_sessions("alice"));
        assert_eq!(manager.online_handles(), 0);
    }

    #[test]
    fn sweep_flags_then_reaps() {
        let manager = SessionManager::new();
        let (tx, mut rx) = SessionManager::channel();
        manager.insert(live("s1", "alice"), tx);

        // First sweep: flagged and pinged, not dead.
        let outcome = manager.sweep(1_000);
        assert!(outcome.dead.is_empty());
        assert_eq!(outcome.pinged, 1);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Outbound::Delta(DeltaFrame::Hb { ack: None, .. })
        ));

        // No hb came back: second sweep reaps.
        let outcome = manager.sweep(31_000);
        assert_eq!(outcome.dead.len(), 1);
        assert_eq!(outcome.dead[0].1, "alice");
    }

    #[test]
    fn hb_between_sweeps_keeps_the_session() {
        let manager = SessionManager::new();
        let (tx, _rx) = SessionManager::channel();
        manager.insert(live("s1", "alice"), tx);

        manager.sweep(1_000);
        manager.mark_alive("s1", 2_000);
        let outcome = manager.sweep(31_000);
        assert!(outcome.dead.is_empty());
        assert_eq!(outcome.pinged, 1);
    }

    #[test]
    fn presence_patch_only_touches_given_fields() {
        let manager = SessionManager::new();
        let (tx, _rx) = SessionManager::channel();
        manager.insert(live("s1", "alice"), tx);

        manager.update_presence(
            "s1",
            None,
            Some(Activity::Coding),
            Some("proj".to_string()),
            None,
            5_000,
        );
        let session = manager.snapshot_of("alice").pop().unwrap();
        assert_eq!(session.presence.activity, Activity::Coding);
        assert_eq!(session.presence.project.as_deref(), Some("proj"));
        assert_eq!(session.presence.status, "Online");
        assert_eq!(session.presence.updated_at, 5_000);
    }

    #[test]
    fn send_to_handle_can_exclude_the_origin_window() {
        let manager = SessionManager::new();
        let (tx1, mut rx1) = SessionManager::channel();
        manager.insert(live("s1", "alice"), tx1);
        let (tx2, mut rx2) = SessionManager::channel();
        manager.insert(live("s2", "alice"), tx2);

        let frame = Outbound::Server(ServerFrame::Error {
            message: "x".to_string(),
        });
        manager.send_to_handle("alice", &frame, Some("s1"));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }
}
