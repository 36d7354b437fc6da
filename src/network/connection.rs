//! Connection - handles an individual client session.
//!
//! Each connection runs in its own tokio task:
//!
//! ```text
//! Phase 1: WebSocket upgrade + rate gate + await `login`
//!    |
//! Phase 2: unified event loop (tokio::select!)
//!    - inbound text frames -> parse -> dispatch
//!    - outbound queue -> socket writes
//!    - shutdown signal -> close
//! ```
//!
//! Frames within one session are processed in arrival order; the loop never
//! reads the next frame until the current handler finished.

use crate::error::HandlerError;
use crate::handlers::{self, Context, login};
use crate::state::session::PendingSession;
use crate::state::{Broker, CloseCause, Outbound, SessionManager};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use glimpse_proto::{ClientFrame, FrameError, MAX_FRAME_BYTES, ServerFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

/// Time a connection may sit without completing its `login`.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// A client connection handler.
pub struct Connection {
    addr: SocketAddr,
    broker: Arc<Broker>,
}

/// What phase 1 decided.
enum LoginOutcome {
    /// Session admitted; run the event loop.
    Admitted(login::Admission),
    /// Connection is done (rejected, timed out, or the peer left).
    Done,
}

impl Connection {
    /// Create a new connection handler.
    pub fn new(addr: SocketAddr, broker: Arc<Broker>) -> Self {
        Self { addr, broker }
    }

    /// Run the connection lifecycle.
    #[instrument(skip(self, stream), fields(addr = %self.addr), name = "connection")]
    pub async fn run(self, stream: TcpStream) -> anyhow::Result<()> {
        // Keep tungstenite's own cap above ours so the oversize path is
        // always our close code, not a transport error.
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(4 * MAX_FRAME_BYTES);
        ws_config.max_frame_size = Some(4 * MAX_FRAME_BYTES);

        let ws = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;
        let (mut sink, mut stream) = ws.split();

        if !self.broker.security.check_connection(self.addr.ip()) {
            crate::metrics::CONNECTIONS_REJECTED.inc();
            debug!("connection rate limit hit, closing");
            let _ = close_with(&mut sink, CloseCode::Policy, "connection rate exceeded").await;
            return Ok(());
        }
        crate::metrics::CONNECTIONS_ACCEPTED.inc();
        info!("Client connected");

        let (tx, mut rx) = SessionManager::channel();

        // Phase 1: admission.
        let admission = match self.await_login(&mut sink, &mut stream, tx).await {
            Ok(LoginOutcome::Admitted(admission)) => admission,
            Ok(LoginOutcome::Done) => return Ok(()),
            Err(e) => {
                warn!(error = %e, "admission failed");
                let _ = send_json(
                    &mut sink,
                    &ServerFrame::Error {
                        message: "Temporary storage error, try again".to_string(),
                    },
                )
                .await;
                let _ = close_with(&mut sink, CloseCode::Error, "admission failed").await;
                return Ok(());
            }
        };

        // Phase 2: unified event loop.
        self.event_loop(&mut sink, &mut stream, &mut rx, &admission.session_id)
            .await;

        // Canonical cleanup. If the sweep already reaped the session this is
        // a no-op.
        self.broker
            .close_session(&admission.session_id, CloseCause::Socket)
            .await;
        info!(handle = %admission.handle, "Client disconnected");
        Ok(())
    }

    /// Phase 1: read frames until a valid `login` admits the session.
    async fn await_login(
        &self,
        sink: &mut WsSink,
        stream: &mut WsStream,
        tx: mpsc::Sender<Outbound>,
    ) -> Result<LoginOutcome, login::AdmitError> {
        loop {
            let message = match tokio::time::timeout(LOGIN_TIMEOUT, stream.next()).await {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => {
                    debug!(error = %e, "transport error before login");
                    return Ok(LoginOutcome::Done);
                }
                Ok(None) => return Ok(LoginOutcome::Done),
                Err(_) => {
                    debug!("login timeout");
                    let _ = close_with(sink, CloseCode::Policy, "login timeout").await;
                    return Ok(LoginOutcome::Done);
                }
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(LoginOutcome::Done),
                Message::Binary(_) => {
                    let _ = send_json(sink, &invalid_format()).await;
                    continue;
                }
                // Ping/pong are handled by the transport.
                _ => continue,
            };

            if text.len() > MAX_FRAME_BYTES {
                let _ = close_with(sink, CloseCode::Size, "message too large").await;
                return Ok(LoginOutcome::Done);
            }

            match ClientFrame::parse(&text) {
                Ok(ClientFrame::Login(frame)) => {
                    let pending =
                        PendingSession::new(self.addr, chrono::Utc::now().timestamp());
                    let admission =
                        login::admit(&self.broker, pending, frame, tx.clone()).await?;
                    return Ok(LoginOutcome::Admitted(admission));
                }
                Ok(other) => {
                    debug!(kind = other.kind(), "frame before login");
                    let _ = send_json(
                        sink,
                        &ServerFrame::Error {
                            message: "Not logged in".to_string(),
                        },
                    )
                    .await;
                    let _ = close_with(sink, CloseCode::Policy, "login required").await;
                    return Ok(LoginOutcome::Done);
                }
                Err(e) if e.is_fatal() => {
                    let _ = close_with(sink, CloseCode::Size, "message too large").await;
                    return Ok(LoginOutcome::Done);
                }
                Err(e) => {
                    crate::metrics::FRAMES_INVALID.inc();
                    debug!(code = e.error_code(), "malformed frame before login");
                    let _ = send_json(sink, &invalid_format()).await;
                }
            }
        }
    }

    /// Phase 2: pump inbound frames, outbound queue, and shutdown.
    async fn event_loop(
        &self,
        sink: &mut WsSink,
        stream: &mut WsStream,
        rx: &mut mpsc::Receiver<Outbound>,
        session_id: &str,
    ) {
        let mut shutdown_rx = self.broker.lifecycle.subscribe();

        loop {
            tokio::select! {
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_text(sink, session_id, &text).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Binary(_))) => {
                            if send_json(sink, &invalid_format()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(error = %e, "transport error");
                            break;
                        }
                    }
                }

                outbound = rx.recv() => {
                    match outbound {
                        Some(Outbound::Server(frame)) => {
                            if send_json(sink, &frame).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Delta(frame)) => {
                            if send_json(sink, &frame).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Close { code, reason }) => {
                            let _ = close_with(sink, CloseCode::from(code), &reason).await;
                            break;
                        }
                        None => break,
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received - disconnecting client");
                    let _ = close_with(sink, CloseCode::Away, "server shutting down").await;
                    break;
                }
            }
        }
    }

    /// One inbound text frame: size gate, parse, dispatch, error frames.
    /// `Err` means the socket must close.
    async fn handle_text(
        &self,
        sink: &mut WsSink,
        session_id: &str,
        text: &str,
    ) -> Result<(), ()> {
        if text.len() > MAX_FRAME_BYTES {
            let _ = close_with(sink, CloseCode::Size, "message too large").await;
            return Err(());
        }

        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e @ FrameError::TooLarge { .. }) => {
                debug!(code = e.error_code(), "oversized frame");
                let _ = close_with(sink, CloseCode::Size, "message too large").await;
                return Err(());
            }
            Err(e) => {
                crate::metrics::FRAMES_INVALID.inc();
                debug!(code = e.error_code(), "malformed frame");
                return send_json(sink, &invalid_format()).await.map_err(|_| ());
            }
        };

        let ctx = Context {
            broker: &self.broker,
            session_id,
        };
        if let Err(e) = handlers::dispatch(&ctx, frame).await {
            match &e {
                HandlerError::Db(db_err) => {
                    warn!(error = %db_err, "store error handling frame");
                    // A closed pool is fatal; transient errors only answer
                    // the triggering request.
                    if matches!(
                        db_err,
                        crate::db::DbError::Sqlx(sqlx::Error::PoolClosed)
                    ) {
                        self.broker.lifecycle.shutdown();
                    }
                }
                other => debug!(code = other.error_code(), "frame rejected"),
            }
            if let Some(reply) = e.to_frame() {
                return send_json(sink, &reply).await.map_err(|_| ());
            }
        }
        Ok(())
    }
}

fn invalid_format() -> ServerFrame {
    ServerFrame::Error {
        message: "Invalid message format".to_string(),
    }
}

async fn send_json<T: serde::Serialize>(
    sink: &mut WsSink,
    frame: &T,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(frame).expect("frame serialization is infallible");
    crate::metrics::FRAMES_SENT.inc();
    sink.send(Message::Text(json)).await
}

async fn close_with(
    sink: &mut WsSink,
    code: CloseCode,
    reason: &str,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    sink.send(Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    })))
    .await
}
