//! WebSocket server: accept loop, sessions, rooms, dispatch, HTTP facade
//!
//! The layers, bottom up:
//!
//! ```text
//! accept loop ──/ws upgrade──▶ session (read + write tasks)
//!                                                   │
//!                                             Dispatcher ──▶ LongPollBridge
//!                                                   │
//!                                          MessageHandler (application)
//!                                                   │
//!                                    RoomRegistry ──▶ member send queues
//! ```
//!
//! [`RelayServerBuilder`] wires the pieces; [`RelayServer`] binds the port
//! and runs the accept loop.

pub mod builder;
pub mod dispatcher;
pub mod http;
pub mod registry;
pub mod session;
pub mod state;

pub use builder::{RelayServerBuilder, DEFAULT_SEND_QUEUE_CAPACITY};
pub use dispatcher::{Dispatcher, MessageHandler};
pub use registry::RoomRegistry;
pub use session::Session;
pub use state::ServerState;

use crate::bridge::{spawn_sweeper, SWEEP_INTERVAL};
use crate::core::error::SessionError;
use anyhow::Result;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

/// The assembled server, ready to bind and serve.
pub struct RelayServer {
    state: Arc<ServerState>,
}

impl RelayServer {
    pub(crate) fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Shared state handle (registry, store, metrics, broadcast helpers).
    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// The configured listen port.
    pub fn port(&self) -> u16 {
        self.state.websocket.port
    }

    /// Token that stops the server when cancelled: the accept loop exits
    /// and every live session transitions to its closing path.
    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.state.shutdown.clone()
    }

    /// Build the axum router for this server.
    pub fn router(&self) -> Router {
        http::build_router(self.state.clone())
    }

    /// Bind the configured port and serve until the process is stopped.
    pub async fn serve(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port()));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            SessionError::BindFailed {
                port: addr.port(),
                message: e.to_string(),
            }
        })?;
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener (tests bind port 0 themselves).
    ///
    /// The accept loop is hand-rolled so each accepted socket gets
    /// `TCP_NODELAY` before it is handed to a connection task.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            %addr,
            max_message_size = self.state.websocket.max_message_size,
            idle_timeout = self.state.websocket.idle_timeout,
            ping_interval = self.state.websocket.ping_interval,
            "relay listening"
        );

        let _sweeper = self
            .state
            .bridge
            .as_ref()
            .map(|bridge| spawn_sweeper(bridge.clone(), SWEEP_INTERVAL));

        let shutdown = self.state.shutdown.clone();
        let router = self.router();
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("server stopping, accept loop closed");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            let router = router.clone();
            tokio::spawn(async move {
                let socket = TokioIo::new(stream);
                let service = hyper::service::service_fn(move |request: axum::http::Request<Incoming>| {
                    router.clone().oneshot(request)
                });

                if let Err(err) = auto::Builder::new(TokioExecutor::new())
                    .serve_connection_with_upgrades(socket, service)
                    .await
                {
                    tracing::debug!(%peer, error = %err, "connection ended with error");
                }
            });
        }
    }
}
