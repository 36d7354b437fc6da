//! Multi-window aggregation.
//!
//! Collapses the set of sessions belonging to one handle into a single
//! displayable presence by fixed activity priority, not last-write-wins: a
//! user idling in one window while coding in another appears coding. Ties
//! break by most recent update.

use crate::cache::CachedPresence;
use crate::state::session::LiveSession;
use glimpse_proto::{Activity, Preferences};
use std::collections::HashSet;

/// One handle's collapsed presence plus the target-side visibility data.
#[derive(Debug, Clone)]
pub struct AggregatedPresence {
    pub handle: String,
    pub resolved_handle: String,
    pub identity_id: Option<i64>,
    pub avatar: Option<String>,
    pub status: String,
    pub activity: Activity,
    pub project: Option<String>,
    pub language: Option<String>,
    pub prefs: Preferences,
    pub followers: Vec<i64>,
    pub following: Vec<i64>,
    pub close_friends: HashSet<i64>,
    pub updated_at: i64,
}

/// Collapse one handle's live sessions. Returns `None` for an empty slice.
pub fn aggregate(sessions: &[LiveSession]) -> Option<AggregatedPresence> {
    let selected = sessions.iter().max_by(|a, b| {
        a.presence
            .activity
            .priority()
            .cmp(&b.presence.activity.priority())
            .then(a.presence.updated_at.cmp(&b.presence.updated_at))
    })?;

    // Stable fields (avatar, prefs, graph) are identical across a handle's
    // sessions; take them from the selected one.
    Some(AggregatedPresence {
        handle: selected.handle.clone(),
        resolved_handle: selected.resolved_handle.clone(),
        identity_id: selected.identity_id(),
        avatar: selected.avatar.clone(),
        status: selected.presence.status.clone(),
        activity: selected.presence.activity,
        project: selected.presence.project.clone(),
        language: selected.presence.language.clone(),
        prefs: selected.prefs.clone(),
        followers: selected.followers.clone(),
        following: selected.following.clone(),
        close_friends: selected.close_friends.clone(),
        updated_at: selected.presence.updated_at,
    })
}

/// Lift a cached presence record (grace-window user with no live sessions)
/// into the same aggregate shape.
pub fn from_cached(record: &CachedPresence) -> AggregatedPresence {
    AggregatedPresence {
        handle: record.handle.clone(),
        resolved_handle: record.resolved_handle.clone(),
        identity_id: record.identity_id,
        avatar: record.avatar.clone(),
        status: record.status.clone(),
        activity: record.activity,
        project: record.project.clone(),
        language: record.language.clone(),
        prefs: record.prefs.clone(),
        followers: record.followers.clone(),
        following: record.following.clone(),
        close_friends: record.close_friends.clone(),
        updated_at: record.last_seen * 1000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::{AdmissionSeed, PendingSession};

    fn session(id: &str, activity: Activity, updated_at: i64) -> LiveSession {
        let mut s = PendingSession::new("127.0.0.1:1".parse().unwrap(), 0).admit(AdmissionSeed {
            session_id: id.to_string(),
            handle: "alice".to_string(),
            resolved_handle: "alice".to_string(),
            user_row_id: 1,
            identity: None,
            followers: Vec::new(),
            following: Vec::new(),
            close_friends: HashSet::new(),
            prefs: Preferences::default(),
            avatar: Some("http://a/alice.png".to_string()),
            now_ms: 0,
            resumed: false,
        });
        s.presence.activity = activity;
        s.presence.updated_at = updated_at;
        s
    }

    #[test]
    fn empty_input_aggregates_to_none() {
        assert!(aggregate(&[]).is_none());
    }

    #[test]
    fn highest_priority_activity_wins() {
        let mut coding = session("s2", Activity::Coding, 10);
        coding.presence.project = Some("p".to_string());
        coding.presence.language = Some("py".to_string());
        let sessions = vec![session("s1", Activity::Idle, 99), coding];

        let agg = aggregate(&sessions).unwrap();
        assert_eq!(agg.activity, Activity::Coding);
        assert_eq!(agg.project.as_deref(), Some("p"));
        assert_eq!(agg.language.as_deref(), Some("py"));
        assert_eq!(agg.avatar.as_deref(), Some("http://a/alice.png"));
    }

    #[test]
    fn debugging_beats_everything() {
        let sessions = vec![
            session("s1", Activity::Coding, 50),
            session("s2", Activity::Debugging, 1),
            session("s3", Activity::Reading, 99),
        ];
        assert_eq!(aggregate(&sessions).unwrap().activity, Activity::Debugging);
    }

    #[test]
    fn ties_break_by_most_recent_update() {
        let mut early = session("s1", Activity::Coding, 10);
        early.presence.project = Some("old".to_string());
        let mut late = session("s2", Activity::Coding, 20);
        late.presence.project = Some("new".to_string());

        let agg = aggregate(&[early, late]).unwrap();
        assert_eq!(agg.project.as_deref(), Some("new"));
    }

    #[test]
    fn closing_the_top_window_demotes_the_aggregate() {
        let sessions = vec![
            session("s1", Activity::Idle, 1),
            session("s2", Activity::Coding, 2),
        ];
        assert_eq!(aggregate(&sessions).unwrap().activity, Activity::Coding);

        let remaining = vec![sessions[0].clone()];
        assert_eq!(aggregate(&remaining).unwrap().activity, Activity::Idle);
    }
}
