//! Preference and close-friend updates.

use super::Context;
use crate::error::HandlerResult;
use glimpse_proto::{ServerFrame, UpdateCloseFriendsFrame, UpdatePreferencesFrame};
use std::collections::HashSet;

/// Persist an `updatePreferences` patch, refresh every session of the
/// handle, and rebroadcast.
pub async fn update_preferences(ctx: &Context<'_>, frame: UpdatePreferencesFrame) -> HandlerResult {
    let session = ctx.session()?;

    // Store first; memory only after the write lands.
    let prefs = ctx
        .broker
        .db
        .users()
        .upsert_preferences(&session.handle, &frame.preferences)
        .await?;

    ctx.broker
        .sessions
        .for_each_of_handle(&session.handle, |s| s.prefs = prefs.clone());
    if let Ok(updated) = ctx.session() {
        let now = chrono::Utc::now().timestamp();
        ctx.broker.cache.refresh_presence(&updated, now);
    }

    // A visibility change alters what every viewer is entitled to see.
    ctx.broker.cache.invalidate_all_contacts();
    ctx.broker.fanout.mark_presence(&session.handle);
    ctx.broker.fanout.mark_resync();

    ctx.reply(ServerFrame::PreferencesUpdated { preferences: prefs });
    Ok(())
}

/// Apply an `updateCloseFriends` edit and report the resulting set.
pub async fn update_close_friends(
    ctx: &Context<'_>,
    frame: UpdateCloseFriendsFrame,
) -> HandlerResult {
    let session = ctx.session()?;
    let now = chrono::Utc::now().timestamp();

    for id in &frame.add {
        ctx.broker
            .db
            .users()
            .add_close_friend(session.user_row_id, *id, now)
            .await?;
    }
    for id in &frame.remove {
        ctx.broker
            .db
            .users()
            .remove_close_friend(session.user_row_id, *id)
            .await?;
    }

    let close_friends = ctx
        .broker
        .db
        .users()
        .close_friend_ids(session.user_row_id)
        .await?;
    let set: HashSet<i64> = close_friends.iter().copied().collect();

    ctx.broker
        .sessions
        .for_each_of_handle(&session.handle, |s| s.close_friends = set.clone());
    if let Ok(updated) = ctx.session() {
        ctx.broker.cache.refresh_presence(&updated, now);
    }

    ctx.broker.cache.invalidate_all_contacts();
    ctx.broker.fanout.mark_presence(&session.handle);
    ctx.broker.fanout.mark_resync();

    ctx.reply(ServerFrame::CloseFriendsUpdated { close_friends });
    Ok(())
}
