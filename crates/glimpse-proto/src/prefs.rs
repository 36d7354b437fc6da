//! Per-user visibility preferences.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who may see a user's live presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    /// Anyone may see this user.
    #[default]
    Everyone,
    /// Only the user's followers.
    Followers,
    /// Only users this user follows.
    Following,
    /// Only the user's close friends.
    CloseFriends,
    /// Nobody (manual connections still see through this).
    Invisible,
}

impl Visibility {
    /// The canonical wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Everyone => "everyone",
            Visibility::Followers => "followers",
            Visibility::Following => "following",
            Visibility::CloseFriends => "close-friends",
            Visibility::Invisible => "invisible",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = UnknownVisibility;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "everyone" => Ok(Visibility::Everyone),
            "followers" => Ok(Visibility::Followers),
            "following" => Ok(Visibility::Following),
            "close-friends" => Ok(Visibility::CloseFriends),
            "invisible" => Ok(Visibility::Invisible),
            other => Err(UnknownVisibility(other.to_string())),
        }
    }
}

/// Error for a visibility mode outside the fixed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown visibility mode: {0}")]
pub struct UnknownVisibility(pub String);

/// A user's full preference record. Created lazily with permissive defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Visibility mode gating who sees this user online.
    pub visibility: Visibility,
    /// Whether the current project name is shared.
    pub share_project: bool,
    /// Whether the current language is shared.
    pub share_language: bool,
    /// Whether the current activity is shared (`false` shows `Hidden`).
    pub share_activity: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            visibility: Visibility::Everyone,
            share_project: true,
            share_language: true,
            share_activity: true,
        }
    }
}

impl Preferences {
    /// Apply a partial update, leaving unset fields untouched.
    pub fn apply(&mut self, patch: &PreferencesPatch) {
        if let Some(v) = patch.visibility {
            self.visibility = v;
        }
        if let Some(p) = patch.share_project {
            self.share_project = p;
        }
        if let Some(l) = patch.share_language {
            self.share_language = l;
        }
        if let Some(a) = patch.share_activity {
            self.share_activity = a;
        }
    }
}

/// Partial preference update as sent by `updatePreferences`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    /// New visibility mode, if changing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// New project sharing flag, if changing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_project: Option<bool>,
    /// New language sharing flag, if changing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_language: Option<bool>,
    /// New activity sharing flag, if changing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_activity: Option<bool>,
}
