//! Fluent builder wiring the server together
//!
//! # Example
//!
//! ```ignore
//! let metrics = Arc::new(RelayMetrics::new());
//! let registry = Arc::new(RoomRegistry::new());
//! let store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::open("relay.db").await?);
//!
//! let server = RelayServerBuilder::new()
//!     .with_config(config)
//!     .with_metrics(metrics.clone())
//!     .with_registry(registry.clone())
//!     .with_store(store.clone())
//!     .ws("/chat", Arc::new(ChatApp::new(store, registry, metrics)))
//!     .build()?;
//!
//! server.serve().await?;
//! ```

use crate::bridge::{
    LongPollBridge, LongPollManager, DEFAULT_BUFFER_CAPACITY, DEFAULT_SESSION_TTL,
};
use crate::config::RelayConfig;
use crate::core::metrics::RelayMetrics;
use crate::server::dispatcher::{Dispatcher, MessageHandler};
use crate::server::registry::RoomRegistry;
use crate::server::state::ServerState;
use crate::server::RelayServer;
use crate::store::{MemoryStore, MessageStore};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a session's outbound frame queue.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 1024;

/// Builder for [`RelayServer`].
pub struct RelayServerBuilder {
    config: RelayConfig,
    store: Option<Arc<dyn MessageStore>>,
    registry: Option<Arc<RoomRegistry>>,
    metrics: Option<Arc<RelayMetrics>>,
    routes: Vec<(String, Arc<dyn MessageHandler>)>,
    long_polling: bool,
    long_poll_ttl: Duration,
    long_poll_capacity: usize,
    send_queue_capacity: usize,
}

impl RelayServerBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            store: None,
            registry: None,
            metrics: None,
            routes: Vec::new(),
            long_polling: true,
            long_poll_ttl: DEFAULT_SESSION_TTL,
            long_poll_capacity: DEFAULT_BUFFER_CAPACITY,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
        }
    }

    /// Use this configuration instead of the defaults.
    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the message store. Omitting it falls back to an in-memory
    /// store with no durability.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a registry built elsewhere (so application handlers can hold
    /// the same one). A fresh registry is created when omitted.
    pub fn with_registry(mut self, registry: Arc<RoomRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Share a metrics registry built elsewhere.
    pub fn with_metrics(mut self, metrics: Arc<RelayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a typed-message handler under a logical endpoint label.
    ///
    /// The label is not yet used for routing; every handler sees every
    /// message.
    pub fn ws(mut self, endpoint: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.routes.push((endpoint.into(), handler));
        self
    }

    /// Disable the long-polling bridge (and the `/ws/poll`, `/ws/send`
    /// fallback endpoints with it).
    pub fn without_long_polling(mut self) -> Self {
        self.long_polling = false;
        self
    }

    /// TTL of untouched long-poll sessions.
    pub fn long_poll_ttl(mut self, ttl: Duration) -> Self {
        self.long_poll_ttl = ttl;
        self
    }

    /// Per-session long-poll buffer capacity.
    pub fn long_poll_capacity(mut self, capacity: usize) -> Self {
        self.long_poll_capacity = capacity;
        self
    }

    /// Bound on each session's outbound frame queue; overflowing sessions
    /// are dropped.
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    /// Assemble the server.
    pub fn build(self) -> Result<RelayServer> {
        self.config.validate()?;

        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(RelayMetrics::new()));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(RoomRegistry::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn MessageStore>);

        let bridge = if self.long_polling {
            let manager =
                LongPollManager::new(self.long_poll_ttl, self.long_poll_capacity, metrics.clone());
            // HTTP-originated envelopes are mirrored straight onto the
            // WebSocket side; the long-poll enqueue already happened in
            // send_from_http, so the hook must not touch the bridge again.
            let forward_registry = registry.clone();
            let forward = Box::new(move |envelope: &crate::core::envelope::Envelope| {
                let Ok(text) = envelope.to_json() else { return };
                if envelope.room.is_empty() {
                    forward_registry.broadcast_text(&text);
                } else {
                    forward_registry.broadcast_room_text(&envelope.room, &text);
                }
            });
            Some(Arc::new(LongPollBridge::new(manager, None, Some(forward))))
        } else {
            None
        };

        let mut dispatcher = Dispatcher::new(metrics.clone());
        if let Some(bridge) = &bridge {
            dispatcher.attach_bridge(bridge.clone());
        }
        for (endpoint, handler) in self.routes {
            dispatcher.add_route(endpoint, handler);
        }

        let state = Arc::new(ServerState {
            websocket: self.config.websocket.clone(),
            send_queue_capacity: self.send_queue_capacity,
            registry,
            dispatcher,
            bridge,
            store,
            metrics,
            shutdown: tokio_util::sync::CancellationToken::new(),
        });

        Ok(RelayServer::new(state))
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
