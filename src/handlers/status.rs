//! Own-presence updates.

use super::Context;
use crate::error::{HandlerError, HandlerResult};
use glimpse_proto::StatusUpdateFrame;

/// Apply a `statusUpdate` to the calling session and queue fan-out.
pub async fn handle(ctx: &Context<'_>, frame: StatusUpdateFrame) -> HandlerResult {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let handle = ctx
        .broker
        .sessions
        .update_presence(
            ctx.session_id,
            frame.status,
            frame.activity,
            frame.project,
            frame.language,
            now_ms,
        )
        .ok_or(HandlerError::NotLoggedIn)?;

    // Refresh the cached record from the updated session so grace-window
    // viewers see the latest fields.
    if let Ok(session) = ctx.session() {
        ctx.broker.cache.refresh_presence(&session, now_ms / 1000);
    }

    ctx.broker.fanout.mark_presence(&handle);
    Ok(())
}
