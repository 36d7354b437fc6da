//! Manual connection removal.

use super::Context;
use crate::error::HandlerResult;
use glimpse_proto::{RemoveConnectionFrame, ServerFrame};
use tracing::info;

/// Handle `removeConnection`: delete the symmetric pair (trying raw and
/// resolved handle forms for both endpoints) and fan out to both.
pub async fn remove(ctx: &Context<'_>, frame: RemoveConnectionFrame) -> HandlerResult {
    let session = ctx.session()?;
    let peer = frame.username.clone();
    let peer_resolved = ctx.broker.db.users().resolve_handle(&peer).await?;

    // The pair may have been written under any combination of forms during
    // an alias transition; each attempt already checks both directions.
    let mut removed = ctx
        .broker
        .db
        .social()
        .remove_connection(&session.handle, &peer)
        .await?;
    if !removed && session.resolved_handle != session.handle {
        removed = ctx
            .broker
            .db
            .social()
            .remove_connection(&session.resolved_handle, &peer)
            .await?;
    }
    if !removed && peer_resolved != peer {
        removed = ctx
            .broker
            .db
            .social()
            .remove_connection(&session.handle, &peer_resolved)
            .await?;
        if !removed && session.resolved_handle != session.handle {
            removed = ctx
                .broker
                .db
                .social()
                .remove_connection(&session.resolved_handle, &peer_resolved)
                .await?;
        }
    }

    if removed {
        info!(a = %session.handle, b = %peer, "manual connection removed");
        ctx.broker.invalidate_contacts(&[
            session.handle.as_str(),
            session.resolved_handle.as_str(),
            peer.as_str(),
            peer_resolved.as_str(),
        ]);
        ctx.broker.fanout.mark_presence(&session.handle);
        ctx.broker.fanout.mark_presence(&peer);
        ctx.broker.fanout.mark_resync();
    }

    ctx.reply(ServerFrame::ConnectionRemoved {
        success: removed,
        username: frame.username,
    });
    Ok(())
}
