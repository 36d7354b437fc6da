//! Guest-to-identity alias registration.

use super::Context;
use crate::error::HandlerResult;
use glimpse_proto::{CreateAliasFrame, ServerFrame};
use tracing::info;

/// Handle `createAlias`: persist the mapping so manual connections made
/// under the guest handle survive the identity upgrade.
pub async fn create(ctx: &Context<'_>, frame: CreateAliasFrame) -> HandlerResult {
    let _session = ctx.session()?;
    let now = chrono::Utc::now().timestamp();

    ctx.broker
        .db
        .users()
        .create_alias(
            &frame.github_username,
            &frame.guest_username,
            frame.github_id,
            now,
        )
        .await?;

    info!(
        login = %frame.github_username,
        guest = %frame.guest_username,
        "alias recorded"
    );

    // Sessions still connected under the guest handle now resolve to the
    // provider login.
    let login = frame.github_username.clone();
    ctx.broker
        .sessions
        .for_each_of_handle(&frame.guest_username, |s| {
            s.resolved_handle = login.clone();
        });

    ctx.broker.cache.invalidate_all_contacts();
    ctx.broker.fanout.mark_resync();

    ctx.reply(ServerFrame::AliasCreated { success: true });
    Ok(())
}
