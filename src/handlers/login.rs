//! Session admission.
//!
//! The first frame of every connection must be a `login`. Three paths, in
//! order: silent resumption via a one-time resume token, identity-provider
//! token validation (falling back to guest on any failure), plain guest.
//! Store writes happen before the in-memory session is constructed; a store
//! failure aborts admission without leaving half a session behind.

use crate::db::DbError;
use crate::fanout::EdgeEvent;
use crate::state::session::{AdmissionSeed, IdentityInfo, PendingSession};
use crate::state::{Broker, Outbound};
use glimpse_proto::{DeltaFrame, LoginFrame, PreferencesPatch, ServerFrame};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Admission failure. Anything here closes the connection; token problems
/// never land here because they degrade to guest.
#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("store failure during admission: {0}")]
    Db(#[from] DbError),
}

/// A successful admission.
pub struct Admission {
    /// The admitted session's id.
    pub session_id: String,
    /// The admitted handle.
    pub handle: String,
}

/// Admit a connection from its `login` frame.
pub async fn admit(
    broker: &Arc<Broker>,
    pending: PendingSession,
    frame: LoginFrame,
    sender: mpsc::Sender<Outbound>,
) -> Result<Admission, AdmitError> {
    let now = chrono::Utc::now().timestamp();
    let now_ms = chrono::Utc::now().timestamp_millis();

    // Path 1: silent resumption. The token is one-shot; a replay fails and
    // falls through to the ordinary paths.
    let mut resumed = false;
    let mut identity: Option<IdentityInfo> = None;
    let mut followers: Vec<i64> = Vec::new();
    let mut following: Vec<i64> = Vec::new();

    if let Some(token) = frame.resume_token.as_deref() {
        match broker.cache.take_resume(token) {
            Some(record) if record.handle == frame.handle => {
                debug!(handle = %frame.handle, "session resumed silently");
                resumed = true;
                identity = record.identity;
            }
            Some(record) => {
                warn!(
                    declared = %frame.handle,
                    token_handle = %record.handle,
                    "resume token handle mismatch, ignoring token"
                );
            }
            None => {
                debug!(handle = %frame.handle, "resume token unknown or expired");
            }
        }
    }

    // Path 2: identity-provider token. Failure or timeout degrades to guest.
    if !resumed && let Some(token) = frame.token.as_deref() {
        let timeout = Duration::from_secs(broker.config.identity.timeout_secs);
        match tokio::time::timeout(timeout, broker.identity.resolve(token)).await {
            Ok(Ok(resolved)) => {
                identity = Some(IdentityInfo {
                    id: resolved.id,
                    login: resolved.login,
                    avatar: resolved.avatar,
                });
                followers = resolved.followers;
                following = resolved.following;
            }
            Ok(Err(e)) => {
                crate::metrics::AUTH_FAILURES.inc();
                warn!(handle = %frame.handle, error = %e, "token validation failed, admitting as guest");
            }
            Err(_) => {
                crate::metrics::AUTH_FAILURES.inc();
                warn!(handle = %frame.handle, "identity provider timed out, admitting as guest");
            }
        }
    }

    // Path 3 (implicit): guest with the declared handle.
    let handle = identity
        .as_ref()
        .map(|i| i.login.clone())
        .unwrap_or_else(|| frame.handle.clone());
    let avatar = identity.as_ref().and_then(|i| i.avatar.clone());

    // Durable state first.
    let user_row_id = broker
        .db
        .users()
        .upsert(&handle, identity.as_ref().map(|i| i.id), avatar.as_deref(), now)
        .await?;

    if resumed {
        // Fast path: edges were replaced at the original admission.
        followers = broker.db.users().edges(user_row_id, "follower").await?;
        following = broker.db.users().edges(user_row_id, "following").await?;
    } else if identity.is_some() {
        broker
            .db
            .users()
            .replace_edges(user_row_id, &followers, &following)
            .await?;
    }

    let prefs = match frame.visibility_mode {
        Some(visibility) => {
            let patch = PreferencesPatch {
                visibility: Some(visibility),
                ..Default::default()
            };
            broker.db.users().upsert_preferences(&handle, &patch).await?
        }
        None => broker.db.users().preferences(&handle).await?,
    };

    let close_friends: HashSet<i64> = broker
        .db
        .users()
        .close_friend_ids(user_row_id)
        .await?
        .into_iter()
        .collect();
    let resolved_handle = broker.db.users().resolve_handle(&handle).await?;
    let was_online = broker.is_online(&handle);

    // Session ids are unique per window; a colliding client-supplied id gets
    // replaced rather than clobbering the existing session.
    let session_id = match frame.session_id.filter(|id| !id.is_empty()) {
        Some(id) if !broker.sessions.sessions.contains_key(&id) => id,
        _ => uuid::Uuid::new_v4().to_string(),
    };

    let session = pending.admit(AdmissionSeed {
        session_id: session_id.clone(),
        handle: handle.clone(),
        resolved_handle,
        user_row_id,
        identity: identity.clone(),
        followers,
        following,
        close_friends,
        prefs,
        avatar,
        now_ms,
        resumed,
    });

    broker.sessions.insert(session.clone(), sender);
    crate::metrics::SESSIONS.set(broker.sessions.len() as i64);
    crate::metrics::LOGINS.inc();

    // Resume token for the next reconnect, then the presence record that
    // makes this handle online.
    let resume_token = broker.cache.mint_resume(&handle, identity);
    broker.sessions.send_to_session(
        &session_id,
        Outbound::Delta(DeltaFrame::Token {
            token: resume_token,
        }),
    );
    broker.cache.refresh_presence(&session, now);

    // Initial state: personalized list (sync framing in delta mode), then
    // unread chat counts.
    crate::fanout::snapshot::send_initial(broker, &session).await;
    match broker.db.chat().unread_counts(&handle).await {
        Ok(counts) if !counts.is_empty() => {
            broker.sessions.send_to_session(
                &session_id,
                Outbound::Server(ServerFrame::ChatUnread { counts }),
            );
        }
        Ok(_) => {}
        Err(e) => warn!(handle = %handle, error = %e, "unread count lookup failed"),
    }

    if !resumed && !was_online {
        broker.fanout.push_edge(EdgeEvent::Online(handle.clone()));
    }
    broker.fanout.mark_presence(&handle);
    broker.fanout.mark_resync();

    info!(
        session_id = %session_id,
        handle = %handle,
        guest = session.identity.is_none(),
        resumed = resumed,
        "session admitted"
    );

    Ok(Admission { session_id, handle })
}
