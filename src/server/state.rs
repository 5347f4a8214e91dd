//! Shared server state behind the axum router
//!
//! One [`ServerState`] instance is built by the
//! [`RelayServerBuilder`](crate::server::RelayServerBuilder) and shared by
//! every connection, the HTTP facade, and the operator-facing broadcast
//! helpers.

use crate::bridge::LongPollBridge;
use crate::config::WebSocketConfig;
use crate::core::envelope::Envelope;
use crate::core::metrics::RelayMetrics;
use crate::server::dispatcher::Dispatcher;
use crate::server::registry::RoomRegistry;
use crate::store::MessageStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a request or connection needs, bundled for `axum::State`.
pub struct ServerState {
    pub(crate) websocket: WebSocketConfig,
    pub(crate) send_queue_capacity: usize,
    pub(crate) registry: Arc<RoomRegistry>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) bridge: Option<Arc<LongPollBridge>>,
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) metrics: Arc<RelayMetrics>,
    pub(crate) shutdown: CancellationToken,
}

impl ServerState {
    /// The room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// The message store.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// The long-polling bridge, when enabled.
    pub fn bridge(&self) -> Option<&Arc<LongPollBridge>> {
        self.bridge.as_ref()
    }

    /// Token cancelled on server stop; the accept loop exits and every
    /// session transitions to its closing path.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Broadcast a pre-serialized envelope to a room, mirroring it into the
    /// long-poll mailboxes so HTTP pollers see the same traffic.
    ///
    /// Returns the number of WebSocket sessions that received the frame.
    pub fn broadcast_room_text(&self, room: &str, text: &str) -> usize {
        self.mirror_to_bridge(text);
        self.registry.broadcast_room_text(room, text)
    }

    /// Broadcast a pre-serialized envelope to every session, mirroring it
    /// into the long-poll mailboxes.
    pub fn broadcast_text(&self, text: &str) -> usize {
        self.mirror_to_bridge(text);
        self.registry.broadcast_text(text)
    }

    fn mirror_to_bridge(&self, text: &str) {
        let Some(bridge) = &self.bridge else { return };
        // Only well-formed envelopes can be mirrored; raw text still goes
        // out on the WebSocket side.
        if let Ok(envelope) = Envelope::parse(text) {
            bridge.on_ws_message(&envelope);
        }
    }
}
