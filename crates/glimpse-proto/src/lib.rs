//! # glimpse-proto
//!
//! Wire protocol types for the Glimpse presence broker.
//!
//! Every frame on the wire is a single UTF-8 JSON object, at most
//! [`MAX_FRAME_BYTES`] long. Client frames carry their kind in a `type` key
//! (`t` is accepted as a short alias, used by heartbeats). Server frames come
//! in two flavors: full frames tagged with `type` ([`ServerFrame`]) and
//! compact delta frames tagged with `t` ([`DeltaFrame`]).
//!
//! ## Parsing client frames
//!
//! ```rust
//! use glimpse_proto::ClientFrame;
//!
//! let frame = ClientFrame::parse(r#"{"type":"statusUpdate","activity":"Coding"}"#).unwrap();
//! assert!(matches!(frame, ClientFrame::StatusUpdate(_)));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod activity;
pub mod error;
pub mod frames;
pub mod prefs;

pub use activity::Activity;
pub use error::FrameError;
pub use frames::{
    AcceptInviteFrame, ChatHistoryFrame, ChatMarkReadFrame, ChatMessageWire, ChatSendFrame,
    ClientFrame, CreateAliasFrame, CreateInviteFrame, DeltaFrame, HbFrame, LoginFrame,
    PresenceUpdate, RemoveConnectionFrame, ServerFrame, StatusUpdateFrame,
    UpdateCloseFriendsFrame, UpdatePreferencesFrame, UserEntry,
};
pub use prefs::{Preferences, PreferencesPatch, Visibility};

/// Maximum size of a single inbound frame, in bytes.
///
/// Frames longer than this close the connection; see [`FrameError::TooLarge`].
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

/// Upper bound on a chat message body, in bytes.
pub const MAX_CHAT_BODY_BYTES: usize = 500;

/// Most recent chat messages returned by a single history request.
pub const MAX_CHAT_HISTORY: u32 = 200;

/// Longest permitted invite lifetime, in hours.
pub const MAX_INVITE_TTL_HOURS: u32 = 168;

/// Default invite lifetime when the client does not pick one, in hours.
pub const DEFAULT_INVITE_TTL_HOURS: u32 = 48;

/// Invite codes are this many uppercase alphanumeric characters.
pub const INVITE_CODE_LEN: usize = 6;
