//! 1:1 chat pipe.

use super::Context;
use crate::error::{HandlerError, HandlerResult};
use crate::state::Outbound;
use glimpse_proto::{
    ChatHistoryFrame, ChatMarkReadFrame, ChatSendFrame, MAX_CHAT_BODY_BYTES, MAX_CHAT_HISTORY,
    ServerFrame,
};

/// Handle `chat.send`: validate, store, deliver to the recipient's live
/// sessions, echo to the sender's other windows. Offline recipients read the
/// message on their next `chat.history`; no push is attempted.
pub async fn send(ctx: &Context<'_>, frame: ChatSendFrame) -> HandlerResult {
    let session = ctx.session()?;
    if frame.body.is_empty() {
        return Err(HandlerError::EmptyBody);
    }
    if frame.body.len() > MAX_CHAT_BODY_BYTES {
        return Err(HandlerError::BodyTooLarge(frame.body.len()));
    }

    let now = chrono::Utc::now().timestamp();
    let message = ctx
        .broker
        .db
        .chat()
        .append(&session.handle, &frame.to, &frame.body, now)
        .await?;
    crate::metrics::CHAT_MESSAGES.inc();

    let delivery = Outbound::Server(ServerFrame::ChatMsg { message });
    ctx.broker.sessions.send_to_handle(&frame.to, &delivery, None);
    ctx.broker
        .sessions
        .send_to_handle(&session.handle, &delivery, Some(ctx.session_id));
    Ok(())
}

/// Handle `chat.history`: most recent messages with one peer, chronological.
pub async fn history(ctx: &Context<'_>, frame: ChatHistoryFrame) -> HandlerResult {
    let session = ctx.session()?;
    let limit = frame.limit.unwrap_or(MAX_CHAT_HISTORY).min(MAX_CHAT_HISTORY);
    let messages = ctx
        .broker
        .db
        .chat()
        .history(&session.handle, &frame.peer, limit)
        .await?;
    ctx.reply(ServerFrame::ChatHistory {
        peer: frame.peer,
        messages,
    });
    Ok(())
}

/// Handle `chat.markRead`: stamp everything unread from the peer.
pub async fn mark_read(ctx: &Context<'_>, frame: ChatMarkReadFrame) -> HandlerResult {
    let session = ctx.session()?;
    let now = chrono::Utc::now().timestamp();
    ctx.broker
        .db
        .chat()
        .mark_read(&session.handle, &frame.peer, now)
        .await?;
    Ok(())
}
