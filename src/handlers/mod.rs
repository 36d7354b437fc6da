//! Frame handlers.
//!
//! The connection event loop parses each inbound frame and hands it to
//! [`dispatch`], which rate-gates it and routes to the per-kind handler.
//! Handlers write the store first and mutate in-memory state only after the
//! write succeeds, so a store error never leaves memory ahead of disk.

pub mod alias;
pub mod chat;
pub mod connection;
pub mod invite;
pub mod login;
pub mod prefs;
pub mod status;

use crate::error::{HandlerError, HandlerResult};
use crate::state::{Broker, LiveSession, Outbound};
use glimpse_proto::{ClientFrame, DeltaFrame, ServerFrame};
use std::sync::Arc;

/// Handler context passed to each frame handler.
pub struct Context<'a> {
    /// Shared broker state.
    pub broker: &'a Arc<Broker>,
    /// The session the frame arrived on.
    pub session_id: &'a str,
}

impl Context<'_> {
    /// Owned snapshot of the calling session.
    pub fn session(&self) -> Result<LiveSession, HandlerError> {
        self.broker
            .sessions
            .sessions
            .get(self.session_id)
            .map(|s| s.clone())
            .ok_or(HandlerError::NotLoggedIn)
    }

    /// Send a full frame back to the calling session.
    pub fn reply(&self, frame: ServerFrame) {
        self.broker
            .sessions
            .send_to_session(self.session_id, Outbound::Server(frame));
    }

    /// Send a compact frame back to the calling session.
    pub fn reply_delta(&self, frame: DeltaFrame) {
        self.broker
            .sessions
            .send_to_session(self.session_id, Outbound::Delta(frame));
    }
}

/// Route one post-admission frame. Heartbeats bypass the message rate gate;
/// liveness must not be throttled away.
pub async fn dispatch(ctx: &Context<'_>, frame: ClientFrame) -> HandlerResult {
    crate::metrics::FRAMES_IN.inc();

    if let ClientFrame::Hb(ref hb) = frame {
        return handle_hb(ctx, hb.ts).await;
    }

    let session = ctx.session()?;
    if !ctx.broker.security.check_message(&session.handle) {
        crate::metrics::RATE_LIMITED.inc();
        return Err(HandlerError::RateLimited);
    }

    match frame {
        ClientFrame::Login(_) => Err(HandlerError::AlreadyLoggedIn),
        ClientFrame::StatusUpdate(f) => status::handle(ctx, f).await,
        ClientFrame::UpdatePreferences(f) => prefs::update_preferences(ctx, f).await,
        ClientFrame::UpdateCloseFriends(f) => prefs::update_close_friends(ctx, f).await,
        ClientFrame::CreateInvite(f) => invite::create(ctx, f).await,
        ClientFrame::AcceptInvite(f) => invite::accept(ctx, f).await,
        ClientFrame::RemoveConnection(f) => connection::remove(ctx, f).await,
        ClientFrame::CreateAlias(f) => alias::create(ctx, f).await,
        ClientFrame::ChatSend(f) => chat::send(ctx, f).await,
        ClientFrame::ChatHistory(f) => chat::history(ctx, f).await,
        ClientFrame::ChatMarkRead(f) => chat::mark_read(ctx, f).await,
        ClientFrame::Hb(_) => unreachable!("handled above"),
    }
}

/// Client heartbeat: restore liveness, refresh the presence record and
/// last-seen, echo an ack.
async fn handle_hb(ctx: &Context<'_>, ts: Option<i64>) -> HandlerResult {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let now = now_ms / 1000;
    ctx.broker.sessions.mark_alive(ctx.session_id, now_ms);

    if let Ok(session) = ctx.session() {
        ctx.broker.cache.refresh_presence(&session, now);
        ctx.broker.note_last_seen(&session.handle, now);
    }

    ctx.reply_delta(DeltaFrame::Hb {
        ts: ts.unwrap_or(now_ms),
        ack: Some(true),
    });
    Ok(())
}
