//! Delta-mode fan-out: per-target pub/sub frames.
//!
//! Presence changes publish masked `u` frames on `presence:<handle>`;
//! come-online and go-offline transitions publish `o`/`x`. The watcher maps
//! are a delivery index only - entitlement is re-evaluated against the
//! viewer before every send, so a stale subscription can never leak a
//! target the viewer may not see.

use super::{EdgeEvent, FanoutWork};
use crate::aggregate::AggregatedPresence;
use crate::fanout::snapshot::collect_targets;
use crate::state::{Broker, Outbound};
use crate::visibility::{TargetCtx, ViewerCtx, can_see, mask};
use glimpse_proto::{DeltaFrame, PresenceUpdate};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Build the masked presence payload for a target.
fn presence_update(target: &AggregatedPresence, now_ms: i64, with_avatar: bool) -> PresenceUpdate {
    let masked = mask(
        &target.prefs,
        target.activity,
        target.project.as_deref(),
        target.language.as_deref(),
    );
    PresenceUpdate {
        id: target.handle.clone(),
        s: target.status.clone(),
        a: masked.activity,
        p: masked.project,
        l: masked.language,
        avatar: with_avatar.then(|| target.avatar.clone()).flatten(),
        ts: now_ms,
    }
}

/// Send a delta about `target` to every entitled watcher.
async fn publish(broker: &Arc<Broker>, target: &AggregatedPresence, frame: DeltaFrame) {
    let target_ctx = TargetCtx {
        handle: &target.handle,
        resolved: &target.resolved_handle,
        prefs: &target.prefs,
        followers: &target.followers,
        following: &target.following,
        close_friends: &target.close_friends,
    };

    for session_id in broker.subscriptions.watchers_of(&target.handle) {
        let Some(viewer) = broker.sessions.sessions.get(&session_id).map(|s| s.clone()) else {
            continue;
        };
        if viewer.handle == target.handle {
            continue;
        }
        let contacts = match broker.contact_entry(&viewer).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(viewer = %viewer.handle, error = %e, "contact lookup failed, skipping delta");
                continue;
            }
        };
        let viewer_ctx = ViewerCtx {
            handle: &viewer.handle,
            resolved: &viewer.resolved_handle,
            identity_id: viewer.identity_id(),
            manual: &contacts.manual_handles,
        };
        if can_see(&viewer_ctx, &target_ctx) {
            broker
                .sessions
                .send_to_session(&session_id, Outbound::Delta(frame.clone()));
        }
    }
}

/// Publish a go-offline event to everyone watching the handle. The target's
/// presence record is gone, so there is nothing left to mask or gate.
fn publish_offline(broker: &Arc<Broker>, handle: &str, now_ms: i64) {
    let frame = DeltaFrame::Offline {
        id: handle.to_string(),
        ts: now_ms,
    };
    for session_id in broker.subscriptions.watchers_of(handle) {
        broker
            .sessions
            .send_to_session(&session_id, Outbound::Delta(frame.clone()));
    }
}

/// Recompute every session's watch set: the online universe plus the
/// viewer's own contact handles (so come-online events for offline contacts
/// have a delivery path).
pub async fn recompute_subscriptions(broker: &Arc<Broker>, targets: &[AggregatedPresence]) {
    let online: Vec<String> = targets.iter().map(|t| t.handle.clone()).collect();
    for viewer in broker.sessions.snapshot() {
        let mut watch: HashSet<String> = online.iter().cloned().collect();
        match broker.contact_entry(&viewer).await {
            Ok(contacts) => {
                watch.extend(contacts.manual_handles.iter().cloned());
                watch.extend(contacts.offline_candidates.iter().map(|c| c.handle.clone()));
            }
            Err(e) => {
                warn!(viewer = %viewer.handle, error = %e, "contact lookup failed during resubscribe");
            }
        }
        watch.remove(&viewer.handle);
        broker
            .subscriptions
            .set_subscriptions(&viewer.session_id, watch);
    }
}

/// Flush one batch of delta work: subscription recompute if the graph
/// changed, then edge events, then presence updates for the dirty handles.
pub async fn flush(broker: &Arc<Broker>, work: FanoutWork) {
    let targets = collect_targets(broker);
    let by_handle: HashMap<&str, &AggregatedPresence> =
        targets.iter().map(|t| (t.handle.as_str(), t)).collect();
    let now_ms = chrono::Utc::now().timestamp_millis();

    if work.resync {
        recompute_subscriptions(broker, &targets).await;
    }

    let mut announced: HashSet<String> = HashSet::new();
    for edge in work.edges {
        match edge {
            EdgeEvent::Online(handle) => {
                if let Some(target) = by_handle.get(handle.as_str()) {
                    let update = presence_update(target, now_ms, true);
                    publish(broker, target, DeltaFrame::Online(update)).await;
                    announced.insert(handle);
                }
            }
            EdgeEvent::Offline(handle) => {
                publish_offline(broker, &handle, now_ms);
                announced.insert(handle);
            }
        }
    }

    for handle in work.dirty {
        if announced.contains(&handle) {
            continue;
        }
        if let Some(target) = by_handle.get(handle.as_str()) {
            let update = presence_update(target, now_ms, false);
            publish(broker, target, DeltaFrame::Update(update)).await;
        }
    }
}
