//! Multi-window aggregation, heartbeat reaping, and silent resumption.

mod common;

use common::{broker, connect, cycle, dispatch, entry_for, guest_login};
use glimpse_proto::{Activity, ClientFrame, DeltaFrame, HbFrame, LoginFrame, StatusUpdateFrame};
use glimpsed::state::{CloseCause, Outbound};

fn status(activity: Activity, project: Option<&str>, language: Option<&str>) -> ClientFrame {
    ClientFrame::StatusUpdate(StatusUpdateFrame {
        status: None,
        activity: Some(activity),
        project: project.map(str::to_string),
        language: language.map(str::to_string),
    })
}

#[tokio::test]
async fn two_windows_collapse_to_highest_priority_activity() {
    let tb = broker().await;
    let mut s1 = connect(&tb, guest_login("alice")).await;
    let mut s2 = connect(&tb, guest_login("alice")).await;
    let mut bob = connect(&tb, guest_login("bob")).await;

    dispatch(&tb, &s1, status(Activity::Idle, None, None))
        .await
        .unwrap();
    dispatch(&tb, &s2, status(Activity::Coding, Some("p"), Some("py")))
        .await
        .unwrap();
    cycle(&tb).await;

    let users = bob.last_user_list().expect("broadcast after updates");
    let alice_entries: Vec<_> = users.iter().filter(|u| u.handle == "alice").collect();
    assert_eq!(alice_entries.len(), 1, "exactly one entry per handle");
    let alice = alice_entries[0];
    assert_eq!(alice.activity, Some(Activity::Coding));
    assert_eq!(alice.project.as_deref(), Some("p"));
    assert_eq!(alice.language.as_deref(), Some("py"));

    // The coding window closes; the aggregate demotes to the idle window.
    tb.close_session(&s2.session_id, CloseCause::Socket).await;
    cycle(&tb).await;

    let users = bob.last_user_list().expect("broadcast after close");
    let alice = entry_for(&users, "alice").expect("alice still online via s1");
    assert_eq!(alice.activity, Some(Activity::Idle));

    s1.drain();
    s2.drain();
}

#[tokio::test]
async fn heartbeat_reaps_after_two_missed_sweeps() {
    let tb = broker().await;
    let mut alice = connect(&tb, guest_login("alice")).await;

    // First sweep flags the session and pings it.
    tb.heartbeat_sweep().await;
    assert!(tb.sessions.has_sessions("alice"));
    let pinged = alice
        .drain()
        .iter()
        .any(|f| matches!(f, Outbound::Delta(DeltaFrame::Hb { ack: None, .. })));
    assert!(pinged, "sweep sends {{t:\"hb\"}}");

    // No hb comes back: the second sweep reaps, and the session is gone
    // from the table before any later broadcast.
    tb.heartbeat_sweep().await;
    assert!(!tb.sessions.has_sessions("alice"));
}

#[tokio::test]
async fn heartbeat_reply_keeps_the_session_alive() {
    let tb = broker().await;
    let mut alice = connect(&tb, guest_login("alice")).await;

    tb.heartbeat_sweep().await;
    dispatch(&tb, &alice, ClientFrame::Hb(HbFrame { ts: Some(42) }))
        .await
        .unwrap();

    let acked = alice.drain().iter().any(|f| {
        matches!(
            f,
            Outbound::Delta(DeltaFrame::Hb {
                ts: 42,
                ack: Some(true)
            })
        )
    });
    assert!(acked, "client hb is echoed with ack");

    tb.heartbeat_sweep().await;
    assert!(tb.sessions.has_sessions("alice"));
}

#[tokio::test]
async fn resumption_within_the_window_never_flaps() {
    let tb = broker().await;
    let mut alice = connect(&tb, guest_login("alice")).await;
    let mut bob = connect(&tb, guest_login("bob")).await;
    cycle(&tb).await;
    assert!(
        entry_for(&bob.last_user_list().unwrap(), "alice").is_some(),
        "alice online before the disconnect"
    );

    let resume_token = alice
        .drain()
        .into_iter()
        .find_map(|f| match f {
            Outbound::Delta(DeltaFrame::Token { token }) => Some(token),
            _ => None,
        })
        .expect("admission sends a resume token");

    // Alice drops. Within the grace window every broadcast still shows her
    // online: no offline transition reaches bob.
    tb.close_session(&alice.session_id, CloseCause::Socket).await;
    cycle(&tb).await;
    let users = bob.last_user_list().expect("broadcast after disconnect");
    let entry = entry_for(&users, "alice").expect("alice still shown during grace window");
    assert_ne!(entry.status, "Offline");

    // Silent resume.
    let alice2 = connect(
        &tb,
        LoginFrame {
            resume_token: Some(resume_token.clone()),
            ..guest_login("alice")
        },
    )
    .await;
    let resumed = tb
        .sessions
        .sessions
        .get(&alice2.session_id)
        .map(|s| s.resumed)
        .unwrap();
    assert!(resumed, "matching token resumes silently");

    cycle(&tb).await;
    let users = bob.last_user_list().expect("broadcast after resume");
    let entry = entry_for(&users, "alice").expect("alice online after resume");
    assert_ne!(entry.status, "Offline");

    // The token was consumed: replaying it admits a plain (non-resumed)
    // session.
    let alice3 = connect(
        &tb,
        LoginFrame {
            resume_token: Some(resume_token),
            ..guest_login("alice")
        },
    )
    .await;
    let resumed = tb
        .sessions
        .sessions
        .get(&alice3.session_id)
        .map(|s| s.resumed)
        .unwrap();
    assert!(!resumed, "second replay does not resume");
}

#[tokio::test]
async fn last_seen_is_durable_after_close() {
    let tb = broker().await;
    let alice = connect(&tb, guest_login("alice")).await;
    tb.close_session(&alice.session_id, CloseCause::Socket).await;

    let row = tb.db.users().by_handle("alice").await.unwrap().unwrap();
    assert!(row.last_seen > 0);
}
