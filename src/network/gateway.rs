//! Gateway - TCP listener that accepts incoming connections.
//!
//! The Gateway binds to a socket and spawns a Connection task for each
//! incoming client. The WebSocket upgrade happens inside the task so a slow
//! handshake never stalls the accept loop.

use crate::network::Connection;
use crate::state::Broker;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

/// The Gateway accepts incoming TCP connections and spawns handlers.
pub struct Gateway {
    listener: TcpListener,
    broker: Arc<Broker>,
}

impl Gateway {
    /// Bind the gateway to the specified address.
    pub async fn bind(addr: SocketAddr, broker: Arc<Broker>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Gateway listening");
        Ok(Self { listener, broker })
    }

    /// The bound address (tests bind port 0 and need the real one).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the gateway, accepting connections until shutdown.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> std::io::Result<()> {
        let mut shutdown_rx = self.broker.lifecycle.subscribe();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let broker = Arc::clone(&self.broker);
                            tokio::spawn(async move {
                                let connection = Connection::new(addr, broker);
                                if let Err(e) = connection.run(stream).await {
                                    error!(%addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Gateway stopping");
                    break;
                }
            }
        }
        Ok(())
    }
}
