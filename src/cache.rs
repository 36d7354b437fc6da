//! In-process presence cache.
//!
//! Holds the short-lived advisory state: presence records with a TTL, one-time
//! resume tokens, and read-through per-viewer contact lists. Nothing here is
//! authoritative - every correctness invariant holds from store state alone,
//! and the TTLs only bound how long a stale view can survive.
//!
//! An expired presence record means offline. Records are refreshed by
//! heartbeats and on socket close, which is what lets a session resume within
//! the grace window without viewers seeing an offline/online flap.

use crate::state::session::{IdentityInfo, LiveSession};
use base64::Engine;
use dashmap::DashMap;
use glimpse_proto::Preferences;
use rand::RngCore;
use std::collections::HashSet;

/// A cached presence record: the displayable fields plus everything a
/// visibility check needs about the target.
#[derive(Debug, Clone)]
pub struct CachedPresence {
    pub handle: String,
    pub resolved_handle: String,
    pub identity_id: Option<i64>,
    pub avatar: Option<String>,
    pub status: String,
    pub activity: glimpse_proto::Activity,
    pub project: Option<String>,
    pub language: Option<String>,
    pub prefs: Preferences,
    pub followers: Vec<i64>,
    pub following: Vec<i64>,
    pub close_friends: HashSet<i64>,
    pub last_seen: i64,
    expires_at_ms: i64,
}

/// What a resume token buys back: the handle it was minted for and the
/// identity resolved at the original admission.
#[derive(Debug, Clone)]
pub struct ResumeRecord {
    pub handle: String,
    pub identity: Option<IdentityInfo>,
}

/// One contact of a viewer, precomputed for offline-entry rendering.
///
/// `visible` folds the full visibility decision for this viewer (manual
/// override included), so snapshot building never leaks a restricted
/// contact as an offline entry.
#[derive(Debug, Clone)]
pub struct OfflineContact {
    pub handle: String,
    pub avatar: Option<String>,
    pub last_seen: i64,
    pub visible: bool,
}

/// Read-through cached contact data for one viewer.
#[derive(Debug, Clone, Default)]
pub struct ContactEntry {
    /// Every handle form manually connected to this viewer (raw peers plus
    /// their alias forms, covering the guest-to-identity transition window).
    pub manual_handles: HashSet<String>,
    /// Contacts eligible for offline entries, with last-seen data.
    pub offline_candidates: Vec<OfflineContact>,
}

/// The in-process presence cache.
pub struct PresenceCache {
    presence: DashMap<String, CachedPresence>,
    resume: DashMap<String, (ResumeRecord, i64)>,
    contacts: DashMap<String, (ContactEntry, i64)>,
    presence_ttl_ms: i64,
    resume_ttl_ms: i64,
    contact_ttl_ms: i64,
}

impl PresenceCache {
    /// Create a cache with the given TTLs (seconds).
    pub fn new(presence_ttl_secs: u64, resume_ttl_secs: u64, contact_ttl_secs: u64) -> Self {
        Self {
            presence: DashMap::new(),
            resume: DashMap::new(),
            contacts: DashMap::new(),
            presence_ttl_ms: presence_ttl_secs as i64 * 1000,
            resume_ttl_ms: resume_ttl_secs as i64 * 1000,
            contact_ttl_ms: contact_ttl_secs as i64 * 1000,
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    // ------------------------------------------------------------------
    // Presence records
    // ------------------------------------------------------------------

    /// Refresh a handle's presence record from a live session snapshot.
    pub fn refresh_presence(&self, session: &LiveSession, last_seen: i64) {
        self.refresh_presence_at(session, last_seen, Self::now_ms());
    }

    /// Clock-injected variant of [`Self::refresh_presence`].
    pub fn refresh_presence_at(&self, session: &LiveSession, last_seen: i64, now_ms: i64) {
        let record = CachedPresence {
            handle: session.handle.clone(),
            resolved_handle: session.resolved_handle.clone(),
            identity_id: session.identity_id(),
            avatar: session.avatar.clone(),
            status: session.presence.status.clone(),
            activity: session.presence.activity,
            project: session.presence.project.clone(),
            language: session.presence.language.clone(),
            prefs: session.prefs.clone(),
            followers: session.followers.clone(),
            following: session.following.clone(),
            close_friends: session.close_friends.clone(),
            last_seen,
            expires_at_ms: now_ms + self.presence_ttl_ms,
        };
        self.presence.insert(session.handle.clone(), record);
    }

    /// Unexpired presence record for a handle; absent means offline.
    pub fn presence(&self, handle: &str) -> Option<CachedPresence> {
        self.presence_at(handle, Self::now_ms())
    }

    /// Clock-injected variant of [`Self::presence`].
    pub fn presence_at(&self, handle: &str, now_ms: i64) -> Option<CachedPresence> {
        self.presence
            .get(handle)
            .filter(|record| record.expires_at_ms > now_ms)
            .map(|record| record.clone())
    }

    /// Handles with unexpired presence records.
    pub fn online_handles(&self) -> Vec<String> {
        let now_ms = Self::now_ms();
        self.presence
            .iter()
            .filter(|record| record.expires_at_ms > now_ms)
            .map(|record| record.handle.clone())
            .collect()
    }

    /// Drop a handle's presence record outright.
    pub fn drop_presence(&self, handle: &str) {
        self.presence.remove(handle);
    }

    /// Remove expired presence records, returning the handles that just
    /// transitioned to offline.
    pub fn prune_presence(&self) -> Vec<String> {
        self.prune_presence_at(Self::now_ms())
    }

    /// Clock-injected variant of [`Self::prune_presence`].
    pub fn prune_presence_at(&self, now_ms: i64) -> Vec<String> {
        let expired: Vec<String> = self
            .presence
            .iter()
            .filter(|record| record.expires_at_ms <= now_ms)
            .map(|record| record.handle.clone())
            .collect();
        for handle in &expired {
            self.presence.remove(handle);
        }
        expired
    }

    // ------------------------------------------------------------------
    // Resume tokens
    // ------------------------------------------------------------------

    /// Mint a one-time resume token for a handle.
    pub fn mint_resume(&self, handle: &str, identity: Option<IdentityInfo>) -> String {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        let record = ResumeRecord {
            handle: handle.to_string(),
            identity,
        };
        self.resume
            .insert(token.clone(), (record, Self::now_ms() + self.resume_ttl_ms));
        token
    }

    /// Consume a resume token. One-shot: the token is deleted whether or not
    /// it was still valid.
    pub fn take_resume(&self, token: &str) -> Option<ResumeRecord> {
        self.take_resume_at(token, Self::now_ms())
    }

    /// Clock-injected variant of [`Self::take_resume`].
    pub fn take_resume_at(&self, token: &str, now_ms: i64) -> Option<ResumeRecord> {
        let (_, (record, expires_at)) = self.resume.remove(token)?;
        (expires_at > now_ms).then_some(record)
    }

    /// Drop expired resume tokens.
    pub fn prune_resume(&self) {
        let now_ms = Self::now_ms();
        self.resume.retain(|_, (_, expires_at)| *expires_at > now_ms);
    }

    // ------------------------------------------------------------------
    // Contact lists (read-through)
    // ------------------------------------------------------------------

    /// Unexpired cached contact entry for a viewer.
    pub fn contacts(&self, handle: &str) -> Option<ContactEntry> {
        let now_ms = Self::now_ms();
        self.contacts
            .get(handle)
            .filter(|entry| entry.1 > now_ms)
            .map(|entry| entry.0.clone())
    }

    /// Store a freshly built contact entry.
    pub fn put_contacts(&self, handle: &str, entry: ContactEntry) {
        self.contacts.insert(
            handle.to_string(),
            (entry, Self::now_ms() + self.contact_ttl_ms),
        );
    }

    /// Invalidate a viewer's cached contacts. Called on manual-connection
    /// and preference changes.
    pub fn invalidate_contacts(&self, handle: &str) {
        self.contacts.remove(handle);
    }

    /// Invalidate every cached contact entry. A preference change alters how
    /// all viewers see the changed user, so everything is rebuilt lazily.
    pub fn invalidate_all_contacts(&self) {
        self.contacts.clear();
    }

    /// Drop expired contact entries.
    pub fn prune_contacts(&self) {
        let now_ms = Self::now_ms();
        self.contacts
            .retain(|_, (_, expires_at)| *expires_at > now_ms);
    }
}
