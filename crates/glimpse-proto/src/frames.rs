//! JSON frame definitions for both directions of the wire.
//!
//! Inbound frames are dispatched on their `type` key (`t` accepted as a
//! short alias; heartbeats use it). Outbound full frames serialize with a
//! `type` tag, compact delta frames with a `t` tag.

use crate::activity::Activity;
use crate::error::FrameError;
use crate::prefs::{Preferences, PreferencesPatch, Visibility};
use crate::MAX_FRAME_BYTES;
use serde::{Deserialize, Serialize};

// ============================================================================
// Client -> server
// ============================================================================

/// First frame of every session.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginFrame {
    /// Declared handle (identity login or self-chosen guest string).
    pub handle: String,
    /// Identity-provider bearer token, if authenticating.
    #[serde(default)]
    pub token: Option<String>,
    /// Visibility mode to overlay onto stored preferences.
    #[serde(default)]
    pub visibility_mode: Option<Visibility>,
    /// Client-chosen window id; a fresh one is minted when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// One-time resume token from a recent session.
    #[serde(default)]
    pub resume_token: Option<String>,
}

/// Update of the sending session's own presence fields.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StatusUpdateFrame {
    /// Display status string, e.g. `"Online"`.
    #[serde(default)]
    pub status: Option<String>,
    /// New activity classification.
    #[serde(default)]
    pub activity: Option<Activity>,
    /// Current project name.
    #[serde(default)]
    pub project: Option<String>,
    /// Current language.
    #[serde(default)]
    pub language: Option<String>,
}

/// Partial preferences update.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdatePreferencesFrame {
    /// Fields to change; unset fields keep their stored values.
    pub preferences: PreferencesPatch,
}

/// Close-friend set edit. Ids are identity-provider user ids.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateCloseFriendsFrame {
    /// Identity ids to add.
    #[serde(default)]
    pub add: Vec<i64>,
    /// Identity ids to remove.
    #[serde(default)]
    pub remove: Vec<i64>,
}

/// Request for a new invite code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInviteFrame {
    /// Lifetime in hours, capped at [`crate::MAX_INVITE_TTL_HOURS`].
    #[serde(default)]
    pub ttl_hours: Option<u32>,
}

/// Redemption of an invite code.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcceptInviteFrame {
    /// The opaque 6-character code.
    pub code: String,
}

/// Removal of a manual connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoveConnectionFrame {
    /// The other endpoint's handle.
    pub username: String,
}

/// Guest-to-identity alias registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAliasFrame {
    /// Identity-provider login.
    pub github_username: String,
    /// The guest handle previously used.
    pub guest_username: String,
    /// Identity-provider numeric id.
    pub github_id: i64,
}

/// 1:1 chat message submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatSendFrame {
    /// Recipient handle.
    pub to: String,
    /// Message body, non-empty and at most [`crate::MAX_CHAT_BODY_BYTES`] bytes.
    pub body: String,
}

/// Request for recent chat history with one peer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatHistoryFrame {
    /// The other party.
    pub peer: String,
    /// Max messages, capped at [`crate::MAX_CHAT_HISTORY`].
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Marks all messages from `peer` to the caller as read.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMarkReadFrame {
    /// The sender whose messages are being acknowledged.
    pub peer: String,
}

/// Heartbeat reply (or client-initiated liveness probe).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HbFrame {
    /// Client clock, milliseconds. Echoed back.
    #[serde(default)]
    pub ts: Option<i64>,
}

/// Every frame kind a client may send.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    /// `login` - session admission.
    Login(LoginFrame),
    /// `statusUpdate` - own presence change.
    StatusUpdate(StatusUpdateFrame),
    /// `updatePreferences` - visibility preference change.
    UpdatePreferences(UpdatePreferencesFrame),
    /// `updateCloseFriends` - close-friend set edit.
    UpdateCloseFriends(UpdateCloseFriendsFrame),
    /// `createInvite` - mint an invite code.
    CreateInvite(CreateInviteFrame),
    /// `acceptInvite` - redeem an invite code.
    AcceptInvite(AcceptInviteFrame),
    /// `removeConnection` - drop a manual connection.
    RemoveConnection(RemoveConnectionFrame),
    /// `createAlias` - record a guest-to-identity alias.
    CreateAlias(CreateAliasFrame),
    /// `chat.send`.
    ChatSend(ChatSendFrame),
    /// `chat.history`.
    ChatHistory(ChatHistoryFrame),
    /// `chat.markRead`.
    ChatMarkRead(ChatMarkReadFrame),
    /// `hb` - heartbeat.
    Hb(HbFrame),
}

impl ClientFrame {
    /// The frame's wire kind, for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Login(_) => "login",
            ClientFrame::StatusUpdate(_) => "statusUpdate",
            ClientFrame::UpdatePreferences(_) => "updatePreferences",
            ClientFrame::UpdateCloseFriends(_) => "updateCloseFriends",
            ClientFrame::CreateInvite(_) => "createInvite",
            ClientFrame::AcceptInvite(_) => "acceptInvite",
            ClientFrame::RemoveConnection(_) => "removeConnection",
            ClientFrame::CreateAlias(_) => "createAlias",
            ClientFrame::ChatSend(_) => "chat.send",
            ClientFrame::ChatHistory(_) => "chat.history",
            ClientFrame::ChatMarkRead(_) => "chat.markRead",
            ClientFrame::Hb(_) => "hb",
        }
    }

    /// Decode one inbound frame.
    ///
    /// The size cap is checked first so an oversized frame never reaches the
    /// JSON parser.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        if text.len() > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge {
                len: text.len(),
                limit: MAX_FRAME_BYTES,
            });
        }

        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = {
            let obj = value.as_object().ok_or(FrameError::NotAnObject)?;
            obj.get("type")
                .or_else(|| obj.get("t"))
                .and_then(|v| v.as_str())
                .ok_or(FrameError::MissingKind)?
                .to_string()
        };

        fn payload<T: serde::de::DeserializeOwned>(
            kind: &'static str,
            value: serde_json::Value,
        ) -> Result<T, FrameError> {
            serde_json::from_value(value).map_err(|source| FrameError::BadPayload { kind, source })
        }

        match kind.as_str() {
            "login" => Ok(ClientFrame::Login(payload("login", value)?)),
            "statusUpdate" => Ok(ClientFrame::StatusUpdate(payload("statusUpdate", value)?)),
            "updatePreferences" => Ok(ClientFrame::UpdatePreferences(payload(
                "updatePreferences",
                value,
            )?)),
            "updateCloseFriends" => Ok(ClientFrame::UpdateCloseFriends(payload(
                "updateCloseFriends",
                value,
            )?)),
            "createInvite" => Ok(ClientFrame::CreateInvite(payload("createInvite", value)?)),
            "acceptInvite" => Ok(ClientFrame::AcceptInvite(payload("acceptInvite", value)?)),
            "removeConnection" => Ok(ClientFrame::RemoveConnection(payload(
                "removeConnection",
                value,
            )?)),
            "createAlias" => Ok(ClientFrame::CreateAlias(payload("createAlias", value)?)),
            "chat.send" => Ok(ClientFrame::ChatSend(payload("chat.send", value)?)),
            "chat.history" => Ok(ClientFrame::ChatHistory(payload("chat.history", value)?)),
            "chat.markRead" => Ok(ClientFrame::ChatMarkRead(payload("chat.markRead", value)?)),
            "hb" => Ok(ClientFrame::Hb(payload("hb", value)?)),
            _ => Err(FrameError::UnknownKind(kind)),
        }
    }
}

// ============================================================================
// Server -> client: full frames (`type` tag)
// ============================================================================

/// One entry in a `userList` or `sync` frame.
///
/// Online entries carry live presence; offline entries carry
/// `status: "Offline"` and a `lastSeen` timestamp instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    /// The user's public handle.
    pub handle: String,
    /// Stable avatar URL, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Display status (`"Online"`, `"Offline"`, ...).
    pub status: String,
    /// Aggregated activity, absent for offline entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
    /// Project, blanked when the target does not share it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Language, blanked when the target does not share it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Unix seconds of last contact, only on offline entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

/// A chat message as delivered or returned by history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageWire {
    /// Server-assigned monotonically increasing id.
    pub id: i64,
    /// Sender handle.
    pub from: String,
    /// Recipient handle.
    pub to: String,
    /// Message body.
    pub body: String,
    /// Unix seconds the server stored the message.
    pub created_at: i64,
    /// Unix seconds the recipient marked it read, if they have.
    pub read_at: Option<i64>,
}

/// Full outbound frames, tagged with `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Personalized snapshot of every visible contact.
    #[serde(rename = "userList")]
    UserList {
        /// Visible online users plus recently-offline contacts.
        users: Vec<UserEntry>,
    },
    /// An invite this user created was redeemed.
    #[serde(rename = "friendJoined")]
    FriendJoined {
        /// Handle of the new connection.
        user: String,
        /// Always `"invite"`.
        via: String,
    },
    /// Reply to `createInvite`.
    #[serde(rename = "inviteCreated")]
    InviteCreated {
        /// The opaque code to share out-of-band.
        code: String,
        /// Seconds until expiry.
        #[serde(rename = "expiresIn")]
        expires_in: i64,
    },
    /// Reply to `acceptInvite`.
    #[serde(rename = "inviteAccepted")]
    InviteAccepted {
        /// Whether the redemption went through.
        success: bool,
        /// The creator's handle on success.
        #[serde(rename = "friendUsername", skip_serializing_if = "Option::is_none")]
        friend_username: Option<String>,
        /// Failure reason otherwise.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to `updatePreferences`, carrying the stored record.
    #[serde(rename = "preferencesUpdated")]
    PreferencesUpdated {
        /// The full preference record after the update.
        preferences: Preferences,
    },
    /// Reply to `removeConnection`.
    #[serde(rename = "connectionRemoved")]
    ConnectionRemoved {
        /// Whether a connection existed and was removed.
        success: bool,
        /// The peer handle from the request.
        username: String,
    },
    /// Reply to `createAlias`.
    #[serde(rename = "aliasCreated")]
    AliasCreated {
        /// Whether the alias was recorded.
        success: bool,
    },
    /// Reply to `updateCloseFriends`, carrying the resulting set.
    #[serde(rename = "closeFriendsUpdated")]
    CloseFriendsUpdated {
        /// Identity ids in the close-friend set after the edit.
        #[serde(rename = "closeFriends")]
        close_friends: Vec<i64>,
    },
    /// A chat message delivered live.
    #[serde(rename = "chat.msg")]
    ChatMsg {
        /// The message.
        #[serde(flatten)]
        message: ChatMessageWire,
    },
    /// Reply to `chat.history`.
    #[serde(rename = "chat.history")]
    ChatHistory {
        /// The other party.
        peer: String,
        /// Messages in chronological order.
        messages: Vec<ChatMessageWire>,
    },
    /// Unread counts per peer, sent at session open.
    #[serde(rename = "chat.unread")]
    ChatUnread {
        /// Map of peer handle to unread message count.
        counts: std::collections::HashMap<String, i64>,
    },
    /// Any request-scoped failure.
    #[serde(rename = "error")]
    Error {
        /// Human-readable reason.
        message: String,
    },
}

// ============================================================================
// Server -> client: compact frames (`t` tag)
// ============================================================================

/// Masked presence payload shared by `u` and `o` deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Target handle.
    pub id: String,
    /// Display status.
    pub s: String,
    /// Masked activity.
    pub a: Activity,
    /// Masked project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    /// Masked language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l: Option<String>,
    /// Avatar, carried on come-online events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Server clock, milliseconds.
    pub ts: i64,
}

/// Compact outbound frames, tagged with `t`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum DeltaFrame {
    /// Server heartbeat ping, or ack of a client heartbeat.
    #[serde(rename = "hb")]
    Hb {
        /// Server clock, milliseconds.
        ts: i64,
        /// Present and true on acks of client heartbeats.
        #[serde(skip_serializing_if = "Option::is_none")]
        ack: Option<bool>,
    },
    /// One-time resume token, sent right after admission.
    #[serde(rename = "token")]
    Token {
        /// Opaque token; consume by replaying it in a `login`.
        token: String,
    },
    /// Presence change for one subscribed target.
    #[serde(rename = "u")]
    Update(PresenceUpdate),
    /// A subscribed target came online.
    #[serde(rename = "o")]
    Online(PresenceUpdate),
    /// A subscribed target went offline.
    #[serde(rename = "x")]
    Offline {
        /// Target handle.
        id: String,
        /// Server clock, milliseconds.
        ts: i64,
    },
    /// Initial state after admission (delta mode).
    #[serde(rename = "sync")]
    Sync {
        /// Same shape as a `userList` snapshot.
        users: Vec<UserEntry>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_kind() {
        let cases = [
            r#"{"type":"login","handle":"alice","token":"tok","visibilityMode":"followers"}"#,
            r#"{"type":"statusUpdate","activity":"Coding","project":"p","language":"py"}"#,
            r#"{"type":"updatePreferences","preferences":{"visibility":"invisible"}}"#,
            r#"{"type":"updateCloseFriends","add":[42]}"#,
            r#"{"type":"createInvite","ttlHours":24}"#,
            r#"{"type":"acceptInvite","code":"XYZ123"}"#,
            r#"{"type":"removeConnection","username":"bob"}"#,
            r#"{"type":"createAlias","githubUsername":"alice","guestUsername":"al","githubId":7}"#,
            r#"{"type":"chat.send","to":"bob","body":"hi"}"#,
            r#"{"type":"chat.history","peer":"bob","limit":10}"#,
            r#"{"type":"chat.markRead","peer":"bob"}"#,
            r#"{"t":"hb","ts":123}"#,
        ];
        for raw in cases {
            let frame = ClientFrame::parse(raw).unwrap_or_else(|e| panic!("{raw}: {e}"));
            assert!(!frame.kind().is_empty());
        }
    }

    #[test]
    fn hb_accepts_type_key_too() {
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"hb"}"#),
            Ok(ClientFrame::Hb(_))
        ));
    }

    #[test]
    fn unknown_kind_is_rejected_without_close() {
        let err = ClientFrame::parse(r#"{"type":"groupChat"}"#).unwrap_err();
        assert!(matches!(err, FrameError::UnknownKind(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn invalid_json_is_not_fatal() {
        let err = ClientFrame::parse("{nope").unwrap_err();
        assert!(matches!(err, FrameError::Json(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn exact_limit_accepted_one_over_fatal() {
        // Pad a valid frame out to exactly the cap with trailing spaces;
        // whitespace after a JSON document is legal.
        let base = r#"{"t":"hb","ts":1}"#;
        let mut exact = String::from(base);
        exact.push_str(&" ".repeat(MAX_FRAME_BYTES - base.len()));
        assert_eq!(exact.len(), MAX_FRAME_BYTES);
        assert!(ClientFrame::parse(&exact).is_ok());

        exact.push(' ');
        let err = ClientFrame::parse(&exact).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn server_frames_tag_with_type() {
        let frame = ServerFrame::Error {
            message: "Invalid message format".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "Invalid message format");
    }

    #[test]
    fn invite_accepted_shape() {
        let frame = ServerFrame::InviteAccepted {
            success: true,
            friend_username: Some("alice".to_string()),
            error: None,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "inviteAccepted");
        assert_eq!(json["friendUsername"], "alice");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn chat_msg_flattens_message_fields() {
        let frame = ServerFrame::ChatMsg {
            message: ChatMessageWire {
                id: 9,
                from: "alice".into(),
                to: "bob".into(),
                body: "hi".into(),
                created_at: 1_700_000_000,
                read_at: None,
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "chat.msg");
        assert_eq!(json["from"], "alice");
        assert_eq!(json["id"], 9);
    }

    #[test]
    fn delta_frames_tag_with_t() {
        let frame = DeltaFrame::Offline {
            id: "alice".into(),
            ts: 1,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["t"], "x");

        let ack = DeltaFrame::Hb {
            ts: 5,
            ack: Some(true),
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["t"], "hb");
        assert_eq!(json["ack"], true);
    }

    #[test]
    fn offline_entry_skips_live_fields() {
        let entry = UserEntry {
            handle: "carol".into(),
            avatar: None,
            status: "Offline".into(),
            activity: None,
            project: None,
            language: None,
            last_seen: Some(1_700_000_000),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "Offline");
        assert_eq!(json["lastSeen"], 1_700_000_000i64);
        assert!(json.get("activity").is_none());
        assert!(json.get("project").is_none());
    }
}
