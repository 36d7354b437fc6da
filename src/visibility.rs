//! Visibility engine.
//!
//! Pure decisions over two orthogonal contact graphs: the identity-provider
//! directed edges (followers/following/close-friends, gated by the target's
//! visibility mode) and invite-derived symmetric manual connections. The
//! composition rule is total and has no precedence surprises: manual
//! connection implies visible - it overrides every mode including
//! `invisible`, because the target consented by issuing or redeeming the
//! invite - otherwise the target's mode decides.
//!
//! Guest targets fall out of the generic evaluation: their follower sets are
//! empty, so identity-gated modes deny everyone and `everyone`/`invisible`
//! behave as written.

use glimpse_proto::{Activity, Preferences, Visibility};
use std::collections::HashSet;

/// The viewer's side of a visibility check.
#[derive(Debug)]
pub struct ViewerCtx<'a> {
    /// Raw handle.
    pub handle: &'a str,
    /// Canonical handle after alias resolution.
    pub resolved: &'a str,
    /// Identity id, if authenticated.
    pub identity_id: Option<i64>,
    /// Every handle form the viewer is manually connected to.
    pub manual: &'a HashSet<String>,
}

/// The target's side of a visibility check.
#[derive(Debug)]
pub struct TargetCtx<'a> {
    /// Raw handle.
    pub handle: &'a str,
    /// Canonical handle after alias resolution.
    pub resolved: &'a str,
    /// Visibility preferences.
    pub prefs: &'a Preferences,
    /// Identity ids following the target.
    pub followers: &'a [i64],
    /// Identity ids the target follows.
    pub following: &'a [i64],
    /// Identity ids the target pinned as close friends.
    pub close_friends: &'a HashSet<i64>,
}

/// Whether a manual connection exists between viewer and target, checked
/// with resolved and raw handles to cover the alias transition window.
pub fn manually_connected(viewer: &ViewerCtx<'_>, target: &TargetCtx<'_>) -> bool {
    viewer.manual.contains(target.handle) || viewer.manual.contains(target.resolved)
}

/// Decide whether `viewer` may see `target` at all.
pub fn can_see(viewer: &ViewerCtx<'_>, target: &TargetCtx<'_>) -> bool {
    // Self-visibility is not a broadcast concern; a user never appears in
    // their own list, but the predicate itself treats self as visible.
    if viewer.handle == target.handle || viewer.resolved == target.resolved {
        return true;
    }

    if manually_connected(viewer, target) {
        return true;
    }

    match target.prefs.visibility {
        Visibility::Invisible => false,
        Visibility::Everyone => true,
        Visibility::Followers => viewer
            .identity_id
            .is_some_and(|id| target.followers.contains(&id)),
        Visibility::Following => viewer
            .identity_id
            .is_some_and(|id| target.following.contains(&id)),
        Visibility::CloseFriends => viewer
            .identity_id
            .is_some_and(|id| target.close_friends.contains(&id)),
    }
}

/// Masked public presence fields, derived from the target's share flags.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedPresence {
    pub activity: Activity,
    pub project: Option<String>,
    pub language: Option<String>,
}

/// Apply the target's share flags to its raw presence fields.
pub fn mask(
    prefs: &Preferences,
    activity: Activity,
    project: Option<&str>,
    language: Option<&str>,
) -> MaskedPresence {
    MaskedPresence {
        activity: if prefs.share_activity {
            activity
        } else {
            Activity::Hidden
        },
        project: prefs
            .share_project
            .then(|| project.map(str::to_string))
            .flatten(),
        language: prefs
            .share_language
            .then(|| language.map(str::to_string))
            .flatten(),
    }
}
