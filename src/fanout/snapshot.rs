//! Snapshot-mode fan-out: personalized `userList` frames.
//!
//! Each cycle collects a consistent aggregate per online handle (live
//! sessions collapsed by priority, grace-window users from the presence
//! cache), then builds every viewer's visible list independently. A failure
//! building one viewer's list never aborts delivery to the others.

use crate::aggregate::{self, AggregatedPresence};
use crate::config::FanoutMode;
use crate::db::DbError;
use crate::state::session::LiveSession;
use crate::state::{Broker, Outbound};
use crate::visibility::{TargetCtx, ViewerCtx, can_see, mask};
use glimpse_proto::{DeltaFrame, ServerFrame, UserEntry};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Collapse the online universe into one aggregate per handle: handles with
/// live sessions from a session-table snapshot, then grace-window handles
/// whose presence records have not yet expired.
pub fn collect_targets(broker: &Arc<Broker>) -> Vec<AggregatedPresence> {
    let mut by_handle: HashMap<String, Vec<LiveSession>> = HashMap::new();
    for session in broker.sessions.snapshot() {
        by_handle
            .entry(session.handle.clone())
            .or_default()
            .push(session);
    }

    let mut targets: Vec<AggregatedPresence> = by_handle
        .values()
        .filter_map(|sessions| aggregate::aggregate(sessions))
        .collect();

    for handle in broker.cache.online_handles() {
        if by_handle.contains_key(&handle) {
            continue;
        }
        if let Some(record) = broker.cache.presence(&handle) {
            targets.push(aggregate::from_cached(&record));
        }
    }

    targets.sort_by(|a, b| a.handle.cmp(&b.handle));
    targets
}

/// Render one visible target into a masked list entry.
fn online_entry(target: &AggregatedPresence) -> UserEntry {
    let masked = mask(
        &target.prefs,
        target.activity,
        target.project.as_deref(),
        target.language.as_deref(),
    );
    UserEntry {
        handle: target.handle.clone(),
        avatar: target.avatar.clone(),
        status: target.status.clone(),
        activity: Some(masked.activity),
        project: masked.project,
        language: masked.language,
        last_seen: None,
    }
}

/// Build one viewer's personalized user list: visible online targets plus
/// recently-offline contacts.
pub async fn build_user_list(
    broker: &Arc<Broker>,
    viewer: &LiveSession,
    targets: &[AggregatedPresence],
) -> Result<Vec<UserEntry>, DbError> {
    let contacts = broker.contact_entry(viewer).await?;
    let viewer_ctx = ViewerCtx {
        handle: &viewer.handle,
        resolved: &viewer.resolved_handle,
        identity_id: viewer.identity_id(),
        manual: &contacts.manual_handles,
    };

    let mut users = Vec::new();
    let mut online: HashSet<&str> = HashSet::new();

    for target in targets {
        online.insert(target.handle.as_str());
        online.insert(target.resolved_handle.as_str());
        if target.handle == viewer.handle {
            continue;
        }
        let target_ctx = TargetCtx {
            handle: &target.handle,
            resolved: &target.resolved_handle,
            prefs: &target.prefs,
            followers: &target.followers,
            following: &target.following,
            close_friends: &target.close_friends,
        };
        if can_see(&viewer_ctx, &target_ctx) {
            users.push(online_entry(target));
        }
    }

    let now = chrono::Utc::now().timestamp();
    let window = broker.config.fanout.offline_window_days * 86_400;
    for contact in &contacts.offline_candidates {
        if !contact.visible
            || online.contains(contact.handle.as_str())
            || now - contact.last_seen >= window
        {
            continue;
        }
        users.push(UserEntry {
            handle: contact.handle.clone(),
            avatar: contact.avatar.clone(),
            status: "Offline".to_string(),
            activity: None,
            project: None,
            language: None,
            last_seen: Some(contact.last_seen),
        });
    }

    Ok(users)
}

/// One full snapshot broadcast: every viewer gets its own list.
pub async fn broadcast_all(broker: &Arc<Broker>) {
    let targets = collect_targets(broker);
    for viewer in broker.sessions.snapshot() {
        match build_user_list(broker, &viewer, &targets).await {
            Ok(users) => {
                broker.sessions.send_to_session(
                    &viewer.session_id,
                    Outbound::Server(ServerFrame::UserList { users }),
                );
            }
            Err(e) => {
                // Per-viewer isolation: log and move on.
                warn!(viewer = %viewer.handle, error = %e, "user list build failed");
            }
        }
    }
}

/// Initial state for a freshly admitted session: an immediate personal list,
/// framed per the active fan-out mode.
pub async fn send_initial(broker: &Arc<Broker>, viewer: &LiveSession) {
    let targets = collect_targets(broker);
    match build_user_list(broker, viewer, &targets).await {
        Ok(users) => {
            let frame = match broker.config.fanout.mode {
                FanoutMode::Snapshot => Outbound::Server(ServerFrame::UserList { users }),
                FanoutMode::Delta => Outbound::Delta(DeltaFrame::Sync { users }),
            };
            broker.sessions.send_to_session(&viewer.session_id, frame);
        }
        Err(e) => {
            warn!(viewer = %viewer.handle, error = %e, "initial user list build failed");
        }
    }
}
