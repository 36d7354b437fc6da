//! Shared broker state.
//!
//! The [`Broker`] is the process-wide aggregate: session table, rate
//! limiters, subscription maps, presence cache, store handle, and the fan-out
//! queue. It is instance-scoped (constructed at startup, `Arc`-shared) so
//! tests can stand up fresh brokers side by side.

pub mod managers;
pub mod session;

pub use managers::{LifecycleManager, Outbound, RateLimitManager, SessionManager, SubscriptionManager};
pub use session::{AdmissionSeed, IdentityInfo, LiveSession, PendingSession, SessionId};

use crate::cache::{ContactEntry, PresenceCache};
use crate::config::Config;
use crate::db::{Database, DbError};
use crate::fanout::{EdgeEvent, FanoutQueue};
use crate::identity::IdentityProvider;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a session is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The socket closed (client quit, transport error).
    Socket,
    /// Two consecutive heartbeat misses.
    Timeout,
    /// Server shutdown.
    Shutdown,
}

/// Parameters for constructing a broker.
pub struct BrokerParams {
    pub config: Arc<Config>,
    pub db: Database,
    pub identity: Arc<dyn IdentityProvider>,
}

/// The shared broker state.
pub struct Broker {
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// Durable store.
    pub db: Database,
    /// Advisory presence cache.
    pub cache: PresenceCache,
    /// Session table.
    pub sessions: SessionManager,
    /// Rate limiters.
    pub security: RateLimitManager,
    /// Delta-mode subscription maps.
    pub subscriptions: SubscriptionManager,
    /// Shutdown signaling.
    pub lifecycle: LifecycleManager,
    /// Debounced fan-out queue.
    pub fanout: FanoutQueue,
    /// Identity provider client.
    pub identity: Arc<dyn IdentityProvider>,
    /// Coalesced last-seen updates awaiting the next flush.
    last_seen_dirty: DashMap<String, i64>,
}

impl Broker {
    /// Construct a broker from its parameters.
    pub fn new(params: BrokerParams) -> Arc<Self> {
        let BrokerParams {
            config,
            db,
            identity,
        } = params;

        if let Some(endpoint) = config.cache.endpoint.as_deref() {
            // External cache endpoints are accepted for config parity but the
            // cache is in-process; see DESIGN.md.
            warn!(endpoint = %endpoint, "cache.endpoint is set; using in-process presence cache");
        }

        let cache = PresenceCache::new(
            config.cache.presence_ttl_secs,
            config.cache.resume_ttl_secs,
            config.cache.contact_ttl_secs,
        );
        let fanout = FanoutQueue::new(config.fanout.debounce_ms);
        let security = RateLimitManager::new(config.rate_limits.clone());

        Arc::new(Self {
            config,
            db,
            cache,
            sessions: SessionManager::new(),
            security,
            subscriptions: SubscriptionManager::new(),
            lifecycle: LifecycleManager::new(),
            fanout,
            identity,
            last_seen_dirty: DashMap::new(),
        })
    }

    /// Record a last-seen timestamp for the next coalesced flush. At most one
    /// store write per user per flush interval.
    pub fn note_last_seen(&self, handle: &str, ts: i64) {
        self.last_seen_dirty
            .entry(handle.to_string())
            .and_modify(|current| *current = (*current).max(ts))
            .or_insert(ts);
    }

    /// Flush coalesced last-seen updates to the store. Failures are logged
    /// and the batch is retried on the next tick.
    pub async fn flush_last_seen(&self) {
        let batch: std::collections::HashMap<String, i64> = self
            .last_seen_dirty
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        if batch.is_empty() {
            return;
        }
        match self.db.users().flush_last_seen(&batch).await {
            Ok(()) => {
                for (handle, ts) in &batch {
                    self.last_seen_dirty
                        .remove_if(handle, |_, current| *current <= *ts);
                }
            }
            Err(e) => warn!(error = %e, count = batch.len(), "last-seen flush failed, will retry"),
        }
    }

    /// Tear down a session: session table, subscriptions, presence cache
    /// refresh (grace window for resumption), and durable last-seen.
    ///
    /// Idempotent - the heartbeat sweep and the socket close path may both
    /// get here for the same session.
    pub async fn close_session(&self, session_id: &str, cause: CloseCause) {
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };
        self.subscriptions.remove_session(session_id);
        crate::metrics::SESSIONS.set(self.sessions.len() as i64);

        let now = chrono::Utc::now().timestamp();
        debug!(
            session_id = %session_id,
            handle = %session.handle,
            cause = ?cause,
            "session closed"
        );

        // Keep the presence record alive so a resumed session within the
        // grace window never flaps offline/online for viewers.
        self.cache.refresh_presence(&session, now);

        if let Err(e) = self.db.users().touch_last_seen(&session.handle, now).await {
            warn!(handle = %session.handle, error = %e, "last-seen write on close failed");
            self.note_last_seen(&session.handle, now);
        }

        self.fanout.mark_presence(&session.handle);
    }

    /// One heartbeat sweep: reap sessions that missed two pings, flag and
    /// ping the rest.
    pub async fn heartbeat_sweep(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let outcome = self.sessions.sweep(now_ms);
        for (session_id, handle) in outcome.dead {
            warn!(session_id = %session_id, handle = %handle, "heartbeat timeout, terminating session");
            self.sessions.send_to_session(
                &session_id,
                Outbound::Close {
                    code: 1001,
                    reason: "heartbeat timeout".to_string(),
                },
            );
            self.close_session(&session_id, CloseCause::Timeout).await;
        }
    }

    /// Prune every TTL'd structure. Presence records that expired while the
    /// handle had no live sessions become go-offline events.
    pub fn prune_caches(&self) {
        for handle in self.cache.prune_presence() {
            if self.sessions.has_sessions(&handle) {
                // Sessions are alive but slow with heartbeats; keep the
                // record rather than flapping.
                if let Some(session) = self.sessions.snapshot_of(&handle).into_iter().next() {
                    let now = chrono::Utc::now().timestamp();
                    self.cache.refresh_presence(&session, now);
                }
                continue;
            }
            self.fanout.push_edge(EdgeEvent::Offline(handle.clone()));
            self.fanout.mark_presence(&handle);
        }
        self.cache.prune_resume();
        self.cache.prune_contacts();
        self.security.cleanup();
    }

    /// A handle is online if it has live sessions or an unexpired presence
    /// record (disconnect grace window).
    pub fn is_online(&self, handle: &str) -> bool {
        self.sessions.has_sessions(handle) || self.cache.presence(handle).is_some()
    }

    /// Read-through contact entry for a viewer: manual-connection handle
    /// forms and offline-entry candidates with their visibility decision
    /// precomputed. Cached for the configured TTL and invalidated on
    /// manual-connection or preference changes.
    pub async fn contact_entry(&self, viewer: &LiveSession) -> Result<ContactEntry, DbError> {
        if let Some(entry) = self.cache.contacts(&viewer.handle) {
            return Ok(entry);
        }

        let mut forms: Vec<&str> = vec![viewer.handle.as_str()];
        if viewer.resolved_handle != viewer.handle {
            forms.push(viewer.resolved_handle.as_str());
        }
        let peers = self.db.social().peers_of(&forms).await?;

        let mut manual_handles: HashSet<String> = peers.iter().cloned().collect();
        for (provider_login, guest_handle) in self.db.users().alias_forms(&peers).await? {
            manual_handles.insert(provider_login);
            manual_handles.insert(guest_handle);
        }

        // Candidate rows: the identity-graph contacts plus the manual peers.
        let mut identity_contacts: Vec<i64> = viewer
            .followers
            .iter()
            .chain(viewer.following.iter())
            .chain(viewer.close_friends.iter())
            .copied()
            .collect();
        identity_contacts.sort_unstable();
        identity_contacts.dedup();

        let mut rows = self.db.users().users_by_identity_ids(&identity_contacts).await?;
        let manual_list: Vec<String> = manual_handles.iter().cloned().collect();
        rows.extend(self.db.users().users_by_handles(&manual_list).await?);
        rows.sort_by(|a, b| a.handle.cmp(&b.handle));
        rows.dedup_by(|a, b| a.handle == b.handle);
        // Never list the viewer themselves.
        rows.retain(|r| r.handle != viewer.handle && r.handle != viewer.resolved_handle);

        let viewer_ctx = crate::visibility::ViewerCtx {
            handle: &viewer.handle,
            resolved: &viewer.resolved_handle,
            identity_id: viewer.identity_id(),
            manual: &manual_handles,
        };

        let mut offline_candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let resolved = self.db.users().resolve_handle(&row.handle).await?;
            let visible = if manual_handles.contains(&row.handle)
                || manual_handles.contains(&resolved)
            {
                true
            } else {
                let prefs = self.db.users().preferences(&row.handle).await?;
                let followers = self.db.users().edges(row.id, "follower").await?;
                let following = self.db.users().edges(row.id, "following").await?;
                let close_friends: HashSet<i64> =
                    self.db.users().close_friend_ids(row.id).await?.into_iter().collect();
                crate::visibility::can_see(
                    &viewer_ctx,
                    &crate::visibility::TargetCtx {
                        handle: &row.handle,
                        resolved: &resolved,
                        prefs: &prefs,
                        followers: &followers,
                        following: &following,
                        close_friends: &close_friends,
                    },
                )
            };
            offline_candidates.push(crate::cache::OfflineContact {
                handle: row.handle,
                avatar: row.avatar,
                last_seen: row.last_seen,
                visible,
            });
        }

        let entry = ContactEntry {
            manual_handles,
            offline_candidates,
        };
        self.cache.put_contacts(&viewer.handle, entry.clone());
        Ok(entry)
    }

    /// Invalidate the cached contact entries of every given handle form.
    pub fn invalidate_contacts(&self, handles: &[&str]) {
        for handle in handles {
            self.cache.invalidate_contacts(handle);
        }
    }
}
