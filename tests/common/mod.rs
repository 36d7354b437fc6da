//! Integration test common infrastructure.
//!
//! Stands up in-process brokers over temp-file SQLite stores and admits
//! sessions directly through the admission path, so tests exercise the real
//! handler/fan-out machinery without sockets. Fan-out cycles are driven
//! explicitly instead of waiting out the debounce timer.

#![allow(dead_code)]

use glimpsed::config::{Config, FanoutMode};
use glimpsed::db::Database;
use glimpsed::handlers::{self, Context, login};
use glimpsed::identity::{IdentityProvider, ResolvedIdentity, StaticIdentityProvider};
use glimpsed::state::session::PendingSession;
use glimpsed::state::{Broker, BrokerParams, Outbound};
use glimpse_proto::{ClientFrame, DeltaFrame, LoginFrame, ServerFrame, UserEntry};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A broker plus the temp dir its store lives in.
pub struct TestBroker {
    pub broker: Arc<Broker>,
    _dir: tempfile::TempDir,
}

impl std::ops::Deref for TestBroker {
    type Target = Arc<Broker>;

    fn deref(&self) -> &Self::Target {
        &self.broker
    }
}

/// Broker with default snapshot fan-out and no identity provider.
pub async fn broker() -> TestBroker {
    broker_with(FanoutMode::Snapshot, StaticIdentityProvider::empty()).await
}

/// Broker with an explicit fan-out mode and identity provider.
pub async fn broker_with(mode: FanoutMode, provider: StaticIdentityProvider) -> TestBroker {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("glimpse.db");

    let toml = format!(
        r#"
        [server]
        name = "test.glimpse"
        metrics_port = 0

        [listen]
        address = "127.0.0.1:0"

        [database]
        path = "{}"

        [fanout]
        mode = "{}"
        debounce_ms = 20
        "#,
        db_path.display(),
        match mode {
            FanoutMode::Snapshot => "snapshot",
            FanoutMode::Delta => "delta",
        },
    );
    let config: Config = toml::from_str(&toml).unwrap();

    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    let broker = Broker::new(BrokerParams {
        config: Arc::new(config),
        db,
        identity: Arc::new(provider) as Arc<dyn IdentityProvider>,
    });

    TestBroker { broker, _dir: dir }
}

/// A canned identity for `StaticIdentityProvider`.
pub fn identity(id: i64, login: &str, followers: Vec<i64>, following: Vec<i64>) -> ResolvedIdentity {
    ResolvedIdentity {
        id,
        login: login.to_string(),
        avatar: Some(format!("http://avatars.test/{login}.png")),
        followers,
        following,
    }
}

/// One admitted test session with its outbound queue.
pub struct TestSession {
    pub session_id: String,
    pub handle: String,
    pub rx: mpsc::Receiver<Outbound>,
}

impl TestSession {
    /// Every frame queued so far.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// The most recent `userList`/`sync` user set, if any arrived.
    pub fn last_user_list(&mut self) -> Option<Vec<UserEntry>> {
        let mut last = None;
        for frame in self.drain() {
            match frame {
                Outbound::Server(ServerFrame::UserList { users })
                | Outbound::Delta(DeltaFrame::Sync { users }) => last = Some(users),
                _ => {}
            }
        }
        last
    }
}

/// A plain guest login frame.
pub fn guest_login(handle: &str) -> LoginFrame {
    LoginFrame {
        handle: handle.to_string(),
        token: None,
        visibility_mode: None,
        session_id: None,
        resume_token: None,
    }
}

/// Admit a session through the real admission path.
pub async fn connect(broker: &Arc<Broker>, frame: LoginFrame) -> TestSession {
    let (tx, rx) = glimpsed::state::SessionManager::channel();
    let pending = PendingSession::new(
        "127.0.0.1:9999".parse().unwrap(),
        chrono::Utc::now().timestamp(),
    );
    let admission = login::admit(broker, pending, frame, tx)
        .await
        .expect("admission");
    TestSession {
        session_id: admission.session_id,
        handle: admission.handle,
        rx,
    }
}

/// Dispatch one frame on a session, as the event loop would.
pub async fn dispatch(
    broker: &Arc<Broker>,
    session: &TestSession,
    frame: ClientFrame,
) -> Result<(), glimpsed::error::HandlerError> {
    handlers::dispatch(
        &Context {
            broker,
            session_id: &session.session_id,
        },
        frame,
    )
    .await
}

/// Flush the pending fan-out work immediately.
pub async fn cycle(broker: &Arc<Broker>) {
    glimpsed::fanout::run_cycle(broker).await;
}

/// Find a handle's entry in a user list.
pub fn entry_for<'a>(users: &'a [UserEntry], handle: &str) -> Option<&'a UserEntry> {
    users.iter().find(|u| u.handle == handle)
}
