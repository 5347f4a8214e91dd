//! WebSocket client with reconnection and heartbeat support
//!
//! A thin client for talking to a relay server (or anything speaking the
//! envelope protocol):
//!
//! - event callbacks for open / message / close
//! - optional automatic reconnection: after any terminal error other than a
//!   normal peer close, one reconnect attempt is scheduled after a
//!   configurable delay; only one attempt is ever in flight because a
//!   single driver task owns the connection
//! - optional heartbeat pings while connected
//! - a bounded send queue drained by the driver, so writes are serialized
//!   in enqueue order with one in-flight write
//!
//! ```ignore
//! let client = RelayClient::builder("ws://127.0.0.1:9090/ws")
//!     .on_message(|text| println!("<- {}", text))
//!     .reconnect(Duration::from_secs(3))
//!     .heartbeat(Duration::from_secs(20))
//!     .connect();
//!
//! client.send_json("chat.join", Payload::new().with("user", "alice").with("room", "general"))?;
//! ```

use crate::core::envelope::{Envelope, Payload};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Default delay before a reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default heartbeat interval when enabled without an explicit value.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

const SEND_QUEUE_CAPACITY: usize = 256;

type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;
type EventCallback = Arc<dyn Fn() + Send + Sync>;

/// Client-side failures surfaced to the caller.
#[derive(Debug)]
pub enum ClientError {
    /// The send queue is full (the connection is too slow or down).
    QueueFull,

    /// The client was closed.
    Closed,

    /// The envelope could not be serialized.
    BadEnvelope { message: String },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::QueueFull => write!(f, "Client send queue is full"),
            ClientError::Closed => write!(f, "Client is closed"),
            ClientError::BadEnvelope { message } => {
                write!(f, "Failed to serialize envelope: {}", message)
            }
        }
    }
}

impl std::error::Error for ClientError {}

/// Builder for [`RelayClient`].
pub struct RelayClientBuilder {
    url: String,
    reconnect_delay: Option<Duration>,
    heartbeat: Option<Duration>,
    on_open: Option<EventCallback>,
    on_message: Option<MessageCallback>,
    on_close: Option<EventCallback>,
}

impl RelayClientBuilder {
    /// Enable automatic reconnection with the given delay between attempts.
    pub fn reconnect(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Enable heartbeat pings at the given interval.
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Callback invoked after every successful handshake.
    pub fn on_open(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(callback));
        self
    }

    /// Callback invoked for every inbound text frame.
    pub fn on_message(mut self, callback: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(callback));
        self
    }

    /// Callback invoked when a connection ends (before any reconnect).
    pub fn on_close(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(callback));
        self
    }

    /// Spawn the connection driver and return the client handle.
    ///
    /// Frames sent before the handshake completes wait in the send queue
    /// and are flushed once connected.
    pub fn connect(self) -> RelayClient {
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();

        let driver = Driver {
            url: self.url.clone(),
            reconnect_delay: self.reconnect_delay,
            heartbeat: self.heartbeat,
            on_open: self.on_open,
            on_message: self.on_message,
            on_close: self.on_close,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(driver.run(outbound_rx));

        RelayClient {
            outbound: outbound_tx,
            shutdown,
            task,
        }
    }
}

/// Handle to a running client connection.
pub struct RelayClient {
    outbound: mpsc::Sender<String>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl RelayClient {
    /// Start building a client for `url` (e.g. `ws://host:9090/ws`).
    pub fn builder(url: impl Into<String>) -> RelayClientBuilder {
        RelayClientBuilder {
            url: url.into(),
            reconnect_delay: None,
            heartbeat: None,
            on_open: None,
            on_message: None,
            on_close: None,
        }
    }

    /// Enqueue a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), ClientError> {
        match self.outbound.try_send(text.into()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ClientError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ClientError::Closed),
        }
    }

    /// Serialize and enqueue a `{type, payload}` envelope.
    pub fn send_json(
        &self,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> Result<(), ClientError> {
        self.send_envelope(&Envelope::new(message_type, payload))
    }

    /// Serialize and enqueue a full envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let text = envelope.to_json().map_err(|e| ClientError::BadEnvelope {
            message: e.to_string(),
        })?;
        self.send_text(text)
    }

    /// Close the connection and wait for the driver to finish.
    pub async fn close(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

enum ConnectionEnd {
    /// Peer closed normally or we were asked to shut down.
    Normal,
    /// Read/write/handshake failure; eligible for reconnect.
    Error,
}

struct Driver {
    url: String,
    reconnect_delay: Option<Duration>,
    heartbeat: Option<Duration>,
    on_open: Option<EventCallback>,
    on_message: Option<MessageCallback>,
    on_close: Option<EventCallback>,
    shutdown: CancellationToken,
}

impl Driver {
    async fn run(self, mut outbound_rx: mpsc::Receiver<String>) {
        loop {
            let end = match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    tracing::debug!(url = %self.url, "client connected");
                    if let Some(on_open) = &self.on_open {
                        on_open();
                    }
                    let end = self.drive_connection(stream, &mut outbound_rx).await;
                    if let Some(on_close) = &self.on_close {
                        on_close();
                    }
                    end
                }
                Err(err) => {
                    tracing::warn!(url = %self.url, error = %err, "client connect failed");
                    ConnectionEnd::Error
                }
            };

            if self.shutdown.is_cancelled() || matches!(end, ConnectionEnd::Normal) {
                break;
            }
            let Some(delay) = self.reconnect_delay else { break };

            tracing::debug!(url = %self.url, delay = ?delay, "scheduling reconnect");
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn drive_connection(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        outbound_rx: &mut mpsc::Receiver<String>,
    ) -> ConnectionEnd {
        let (mut sink, mut source) = stream.split();

        let mut heartbeat = self.heartbeat.map(|every| {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.reset();
            ticker
        });

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return ConnectionEnd::Normal;
                }

                maybe_text = outbound_rx.recv() => {
                    let Some(text) = maybe_text else {
                        let _ = sink.send(Message::Close(None)).await;
                        return ConnectionEnd::Normal;
                    };
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        tracing::warn!(error = %err, "client write failed");
                        return ConnectionEnd::Error;
                    }
                }

                () = tick(heartbeat.as_mut()) => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        return ConnectionEnd::Error;
                    }
                }

                frame = source.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(on_message) = &self.on_message {
                                on_message(text);
                            }
                        }
                        Some(Ok(Message::Close(_))) => return ConnectionEnd::Normal,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "client read failed");
                            return ConnectionEnd::Error;
                        }
                        None => return ConnectionEnd::Error,
                    }
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
