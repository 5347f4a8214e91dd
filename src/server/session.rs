//! Per-connection session: handshake, read loop, write queue, idle timer
//!
//! A connection lives as a pair of tasks:
//!
//! 1. The read loop (the upgrade task itself) pulls frames off the socket,
//!    hands text frames to the dispatcher exactly once each, and rearms the
//!    idle timer after every read.
//! 2. A writer task owns the socket's sink and drains the session's bounded
//!    outbound channel, so all writes are serialized in enqueue order no
//!    matter which task called [`Session::send_text`].
//!
//! The session dies on peer close, read error, idle timeout, send-queue
//! overflow, or an explicit [`Session::close`]; the close path sends a
//! normal close frame, runs the application close hooks, and sweeps the
//! session from every room and the global registry.

use crate::server::state::ServerState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle to one live WebSocket connection.
///
/// Identity is the `Arc` pointer: the room registry stores `Weak<Session>`
/// and compares with `Arc::ptr_eq`.
pub struct Session {
    connection_id: String,
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new(connection_id: String, outbound: mpsc::Sender<String>) -> Self {
        Self {
            connection_id,
            outbound,
            closed: CancellationToken::new(),
        }
    }

    /// Unique connection id, assigned at upgrade time.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Enqueue a text frame for this session. Safe to call from any task;
    /// frames are written in enqueue order.
    ///
    /// If the bounded queue is full the session is overloaded and gets
    /// closed instead of blocking the caller.
    pub fn send_text(&self, text: impl Into<String>) {
        if self.closed.is_cancelled() {
            return;
        }
        match self.outbound.try_send(text.into()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    capacity = self.outbound.max_capacity(),
                    "send queue overflow, dropping session"
                );
                self.closed.cancel();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Writer already gone; the session is on its way out.
            }
        }
    }

    /// Ask the session to close. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the session has started closing.
    pub fn is_closing(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn closed(&self) -> &CancellationToken {
        &self.closed
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id)
            .field("closing", &self.closed.is_cancelled())
            .finish()
    }
}

/// Drive one upgraded WebSocket connection to completion.
pub(crate) async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let connection_id = format!("conn_{}", Uuid::new_v4().simple());
    let (outbound_tx, outbound_rx) = mpsc::channel(state.send_queue_capacity);
    let session = Arc::new(Session::new(connection_id.clone(), outbound_tx));

    state.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
    state.metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    state.registry.register(&session);
    tracing::debug!(connection_id = %connection_id, "session open");

    let (ws_tx, ws_rx) = socket.split();

    let writer = tokio::spawn(write_loop(
        ws_tx,
        outbound_rx,
        session.clone(),
        state.clone(),
    ));

    state.dispatcher.dispatch_open(&session).await;
    read_loop(ws_rx, &session, &state).await;

    // CLOSING: stop both loops, let the writer send the close frame.
    session.close();
    let _ = writer.await;

    // CLOSED: application hooks, then sweep from rooms and the registry.
    state.dispatcher.dispatch_close(&session).await;
    state.registry.unregister(&session);
    state.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!(connection_id = %connection_id, "session closed");
}

async fn read_loop(
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
    session: &Arc<Session>,
    state: &Arc<ServerState>,
) {
    // When the idle timer is disabled the sleep is armed far out and the
    // guard below keeps it from ever being polled.
    const FAR_FUTURE: std::time::Duration = std::time::Duration::from_secs(86_400 * 365);
    let idle_timeout = state.websocket.idle_timeout();
    let idle = tokio::time::sleep(idle_timeout.unwrap_or(FAR_FUTURE));
    tokio::pin!(idle);

    loop {
        tokio::select! {
            () = session.closed().cancelled() => break,

            () = state.shutdown.cancelled() => {
                tracing::debug!(
                    connection_id = %session.connection_id(),
                    "server stopping, closing connection"
                );
                break;
            }

            () = &mut idle, if idle_timeout.is_some() => {
                tracing::info!(
                    connection_id = %session.connection_id(),
                    "idle timeout reached, closing connection"
                );
                break;
            }

            frame = ws_rx.next() => {
                if let Some(timeout) = idle_timeout {
                    idle.as_mut().reset(tokio::time::Instant::now() + timeout);
                }
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        state.dispatcher.dispatch_text(session, &text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        state.dispatcher.dispatch_binary(session, &bytes).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Control frames only reset the idle timer; the
                        // transport answers pings itself.
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!(
                            connection_id = %session.connection_id(),
                            "peer closed"
                        );
                        break;
                    }
                    Some(Err(err)) => {
                        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            connection_id = %session.connection_id(),
                            error = %err,
                            "read error"
                        );
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

async fn write_loop(
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<String>,
    session: Arc<Session>,
    state: Arc<ServerState>,
) {
    let ping_interval = state.websocket.ping_interval();
    let mut ping = ping_interval.map(|every| {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ticker.reset();
        ticker
    });

    loop {
        tokio::select! {
            () = session.closed().cancelled() => {
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "".into(),
                    })))
                    .await;
                break;
            }

            maybe_text = outbound_rx.recv() => {
                let Some(text) = maybe_text else { break };
                if let Err(err) = ws_tx.send(Message::Text(text)).await {
                    tracing::warn!(
                        connection_id = %session.connection_id(),
                        error = %err,
                        "write error, closing session"
                    );
                    session.close();
                    break;
                }
                state.metrics.messages_out_total.fetch_add(1, Ordering::Relaxed);
            }

            () = tick(ping.as_mut()) => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    session.close();
                    break;
                }
            }
        }
    }
}

async fn tick(ticker: Option<&mut tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_text_enqueues_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = Session::new("conn_test".to_string(), tx);

        session.send_text("a");
        session.send_text("b");
        assert_eq!(rx.recv().await, Some("a".to_string()));
        assert_eq!(rx.recv().await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_send_text_after_close_is_dropped() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = Session::new("conn_test".to_string(), tx);

        session.close();
        session.send_text("late");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_queue_overflow_marks_session_closing() {
        let (tx, _rx) = mpsc::channel(2);
        let session = Session::new("conn_test".to_string(), tx);

        session.send_text("1");
        session.send_text("2");
        assert!(!session.is_closing());

        // Third frame exceeds the bound: the session must be dropped, not
        // the caller blocked.
        session.send_text("3");
        assert!(session.is_closing());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tx, _rx) = mpsc::channel(2);
        let session = Session::new("conn_test".to_string(), tx);
        session.close();
        session.close();
        assert!(session.is_closing());
    }
}
