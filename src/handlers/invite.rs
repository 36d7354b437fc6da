//! Invite code lifecycle.

use super::Context;
use crate::db::{DbError, InviteRedeem};
use crate::error::HandlerResult;
use crate::state::Outbound;
use glimpse_proto::{
    AcceptInviteFrame, CreateInviteFrame, DEFAULT_INVITE_TTL_HOURS, INVITE_CODE_LEN,
    MAX_INVITE_TTL_HOURS, ServerFrame,
};
use rand::Rng;
use tracing::{debug, info};

/// Alphabet for invite codes: uppercase alphanumerics, case-sensitive.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Attempts before giving up on a unique code. Collisions are vanishingly
/// rare in a 36^6 space; repeated failure means something else is wrong.
const CODE_ATTEMPTS: usize = 4;

/// Mint a fresh invite code.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Handle `createInvite`: store a code with the clamped TTL and return it.
pub async fn create(ctx: &Context<'_>, frame: CreateInviteFrame) -> HandlerResult {
    let session = ctx.session()?;
    let ttl_hours = frame
        .ttl_hours
        .unwrap_or(DEFAULT_INVITE_TTL_HOURS)
        .min(MAX_INVITE_TTL_HOURS);
    let expires_in = i64::from(ttl_hours) * 3600;
    let now = chrono::Utc::now().timestamp();

    for attempt in 0.. {
        let code = generate_code();
        match ctx
            .broker
            .db
            .social()
            .create_invite(&code, &session.handle, now, now + expires_in)
            .await
        {
            Ok(()) => {
                crate::metrics::INVITES_CREATED.inc();
                info!(creator = %session.handle, ttl_hours = ttl_hours, "invite created");
                ctx.reply(ServerFrame::InviteCreated { code, expires_in });
                return Ok(());
            }
            Err(DbError::Sqlx(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() && attempt + 1 < CODE_ATTEMPTS =>
            {
                debug!(attempt = attempt, "invite code collision, regenerating");
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("code generation loop always returns")
}

/// Handle `acceptInvite`: atomic redeem, symmetric connection, creator
/// notification, fan-out.
pub async fn accept(ctx: &Context<'_>, frame: AcceptInviteFrame) -> HandlerResult {
    let session = ctx.session()?;
    let now = chrono::Utc::now().timestamp();

    let outcome = ctx
        .broker
        .db
        .social()
        .redeem_invite(&frame.code, &session.handle, now)
        .await?;

    match outcome {
        InviteRedeem::Accepted { creator } => {
            crate::metrics::INVITES_REDEEMED.inc();
            info!(creator = %creator, redeemer = %session.handle, "invite redeemed");

            let creator_resolved = ctx.broker.db.users().resolve_handle(&creator).await?;
            ctx.broker.invalidate_contacts(&[
                creator.as_str(),
                creator_resolved.as_str(),
                session.handle.as_str(),
                session.resolved_handle.as_str(),
            ]);

            ctx.broker.sessions.send_to_handle(
                &creator,
                &Outbound::Server(ServerFrame::FriendJoined {
                    user: session.handle.clone(),
                    via: "invite".to_string(),
                }),
                None,
            );

            ctx.reply(ServerFrame::InviteAccepted {
                success: true,
                friend_username: Some(creator.clone()),
                error: None,
            });

            ctx.broker.fanout.mark_presence(&creator);
            ctx.broker.fanout.mark_presence(&session.handle);
            ctx.broker.fanout.mark_resync();
            Ok(())
        }
        InviteRedeem::Rejected(reason) => {
            debug!(code = %frame.code, redeemer = %session.handle, reason = ?reason, "invite rejected");
            ctx.reply(ServerFrame::InviteAccepted {
                success: false,
                friend_username: None,
                error: Some("Invalid, expired, or already used invite code".to_string()),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_uppercase_alphanumerics() {
        for _ in 0..64 {
            let code = generate_code();
            assert_eq!(code.len(), INVITE_CODE_LEN);
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            );
        }
    }
}
