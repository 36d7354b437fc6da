//! Privacy filtering in broadcasts: the manual-connection override,
//! invisibility, field masking, and the offline-contact window.

mod common;

use common::{broker, connect, cycle, dispatch, entry_for, guest_login};
use glimpse_proto::{
    AcceptInviteFrame, Activity, ClientFrame, CreateInviteFrame, PreferencesPatch, ServerFrame,
    StatusUpdateFrame, UpdatePreferencesFrame, Visibility,
};
use glimpsed::state::{CloseCause, Outbound};

async fn connect_pair(tb: &common::TestBroker) -> (common::TestSession, common::TestSession) {
    let mut alice = connect(tb, guest_login("alice")).await;
    let mut bob = connect(tb, guest_login("bob")).await;

    dispatch(tb, &alice, ClientFrame::CreateInvite(CreateInviteFrame::default()))
        .await
        .unwrap();
    let code = alice
        .drain()
        .into_iter()
        .find_map(|f| match f {
            Outbound::Server(ServerFrame::InviteCreated { code, .. }) => Some(code),
            _ => None,
        })
        .expect("inviteCreated");
    dispatch(
        tb,
        &bob,
        ClientFrame::AcceptInvite(AcceptInviteFrame { code }),
    )
    .await
    .unwrap();
    bob.drain();
    (alice, bob)
}

fn set_visibility(mode: Visibility) -> ClientFrame {
    ClientFrame::UpdatePreferences(UpdatePreferencesFrame {
        preferences: PreferencesPatch {
            visibility: Some(mode),
            ..Default::default()
        },
    })
}

#[tokio::test]
async fn manual_connection_overrides_invisible() {
    let tb = broker().await;
    let (mut alice, mut bob) = connect_pair(&tb).await;
    let mut carol = connect(&tb, guest_login("carol")).await;

    dispatch(&tb, &alice, set_visibility(Visibility::Invisible))
        .await
        .unwrap();
    let confirmed = alice.drain().into_iter().any(|f| {
        matches!(
            f,
            Outbound::Server(ServerFrame::PreferencesUpdated { ref preferences })
                if preferences.visibility == Visibility::Invisible
        )
    });
    assert!(confirmed, "preferencesUpdated echoes the stored record");

    cycle(&tb).await;

    // Bob is manually connected: he still sees alice.
    let bob_list = bob.last_user_list().expect("broadcast to bob");
    assert!(entry_for(&bob_list, "alice").is_some());

    // Carol is not: alice appears nowhere in her list, online or offline.
    let carol_list = carol.last_user_list().expect("broadcast to carol");
    assert!(entry_for(&carol_list, "alice").is_none());
}

#[tokio::test]
async fn share_flags_mask_fields_in_broadcasts() {
    let tb = broker().await;
    let mut alice = connect(&tb, guest_login("alice")).await;
    let mut bob = connect(&tb, guest_login("bob")).await;

    dispatch(
        &tb,
        &alice,
        ClientFrame::StatusUpdate(StatusUpdateFrame {
            status: None,
            activity: Some(Activity::Debugging),
            project: Some("secret-project".to_string()),
            language: Some("rust".to_string()),
        }),
    )
    .await
    .unwrap();
    dispatch(
        &tb,
        &alice,
        ClientFrame::UpdatePreferences(UpdatePreferencesFrame {
            preferences: PreferencesPatch {
                share_project: Some(false),
                share_activity: Some(false),
                ..Default::default()
            },
        }),
    )
    .await
    .unwrap();
    alice.drain();
    cycle(&tb).await;

    let users = bob.last_user_list().expect("broadcast to bob");
    let entry = entry_for(&users, "alice").expect("alice visible");
    assert_eq!(entry.activity, Some(Activity::Hidden), "activity masked");
    assert_eq!(entry.project, None, "project blanked");
    assert_eq!(entry.language.as_deref(), Some("rust"), "language still shared");
}

#[tokio::test]
async fn offline_contacts_respect_the_seven_day_window() {
    let tb = broker().await;
    let (mut alice, bob) = connect_pair(&tb).await;

    // Bob goes fully offline: session closed and grace record gone.
    tb.close_session(&bob.session_id, CloseCause::Socket).await;
    tb.cache.drop_presence("bob");
    tb.cache.invalidate_contacts("alice");

    cycle(&tb).await;
    let users = alice.last_user_list().expect("broadcast to alice");
    let entry = entry_for(&users, "bob").expect("recently-offline contact listed");
    assert_eq!(entry.status, "Offline");
    assert!(entry.last_seen.is_some());
    assert_eq!(entry.activity, None);

    // Eight days of silence pushes bob out of the window.
    let stale = chrono::Utc::now().timestamp() - 8 * 86_400;
    sqlx::query("UPDATE users SET last_seen = ? WHERE handle = ?")
        .bind(stale)
        .bind("bob")
        .execute(tb.db.pool())
        .await
        .unwrap();
    tb.cache.invalidate_contacts("alice");
    tb.fanout.mark_presence("bob");

    cycle(&tb).await;
    let users = alice.last_user_list().expect("second broadcast to alice");
    assert!(
        entry_for(&users, "bob").is_none(),
        "contacts beyond the window are dropped"
    );
}

#[tokio::test]
async fn strangers_see_default_visibility_guests() {
    let tb = broker().await;
    let mut alice = connect(&tb, guest_login("alice")).await;
    let mut bob = connect(&tb, guest_login("bob")).await;
    cycle(&tb).await;

    // Permissive defaults: two unrelated guests see each other.
    assert!(entry_for(&alice.last_user_list().unwrap(), "bob").is_some());
    assert!(entry_for(&bob.last_user_list().unwrap(), "alice").is_some());
}
