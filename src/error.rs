//! Unified error handling for glimpsed.
//!
//! Frame handlers return `HandlerError`; the connection loop converts each
//! error into either an `error` frame (session stays open) or a close.

use crate::db::DbError;
use glimpse_proto::ServerFrame;
use thiserror::Error;

/// Errors that can occur while handling a client frame.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("already logged in")]
    AlreadyLoggedIn,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("empty message body")]
    EmptyBody,

    #[error("message body too large: {0} bytes")]
    BodyTooLarge(usize),

    #[error("invalid invite code")]
    InvalidInvite,

    #[error("cannot redeem your own invite")]
    SelfInvite,

    #[error("no connection with {0}")]
    NoSuchConnection(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// Outbound queue to this session is gone; the socket is closing.
    #[error("session send failed")]
    Send,

    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotLoggedIn => "not_logged_in",
            Self::AlreadyLoggedIn => "already_logged_in",
            Self::RateLimited => "rate_limited",
            Self::EmptyBody => "empty_body",
            Self::BodyTooLarge(_) => "body_too_large",
            Self::InvalidInvite => "invalid_invite",
            Self::SelfInvite => "self_invite",
            Self::NoSuchConnection(_) => "no_such_connection",
            Self::UnknownUser(_) => "unknown_user",
            Self::Db(_) => "db_error",
            Self::Send => "send_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Convert to a client-visible `error` frame.
    ///
    /// Returns `None` for errors that don't warrant a reply (the socket is
    /// already closing, or the failure is internal-only).
    pub fn to_frame(&self) -> Option<ServerFrame> {
        let message = match self {
            Self::NotLoggedIn => "Not logged in".to_string(),
            Self::AlreadyLoggedIn => "Already logged in".to_string(),
            Self::RateLimited => "Rate limit exceeded".to_string(),
            Self::EmptyBody => "Message body must not be empty".to_string(),
            Self::BodyTooLarge(_) => "Message body too large".to_string(),
            Self::InvalidInvite | Self::SelfInvite => {
                "Invalid, expired, or already used invite code".to_string()
            }
            Self::NoSuchConnection(peer) => format!("No connection with {}", peer),
            Self::UnknownUser(handle) => format!("Unknown user: {}", handle),
            // Transient store failures surface generically; details stay in logs.
            Self::Db(_) => "Temporary storage error, try again".to_string(),
            Self::Send => return None,
            Self::Internal(_) => return None,
        };
        Some(ServerFrame::Error { message })
    }
}

/// Result type for frame handlers.
pub type HandlerResult = Result<(), HandlerError>;
