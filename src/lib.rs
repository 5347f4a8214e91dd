//! # relay
//!
//! A real-time messaging server: WebSocket transport with named rooms,
//! durable message history with replay on join, an HTTP long-polling
//! fallback sharing the same envelope bus, and Prometheus-style metrics.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use relay::prelude::*;
//!
//! let metrics = Arc::new(RelayMetrics::new());
//! let registry = Arc::new(RoomRegistry::new());
//! let store: Arc<dyn MessageStore> =
//!     Arc::new(SqliteMessageStore::open("relay.db").await?);
//!
//! RelayServerBuilder::new()
//!     .with_config(RelayConfig::from_yaml_file("relay.yaml")?)
//!     .with_metrics(metrics.clone())
//!     .with_registry(registry.clone())
//!     .with_store(store.clone())
//!     .ws("/chat", Arc::new(ChatApp::new(store, registry, metrics)))
//!     .build()?
//!     .serve()
//!     .await?;
//! ```
//!
//! ## Wire format
//!
//! Every text frame is a JSON envelope; only `type` is required:
//!
//! ```json
//! {"id": "...", "kind": "event", "ts": "...", "room": "africa",
//!  "type": "chat.message", "payload": {"user": "alice", "text": "hi"}}
//! ```

pub mod app;
pub mod bridge;
pub mod client;
pub mod config;
pub mod core;
pub mod server;
pub mod store;

/// Re-exports of commonly used types.
pub mod prelude {
    pub use crate::app::{ChatApp, HISTORY_LIMIT};
    pub use crate::bridge::{LongPollBridge, LongPollManager};
    pub use crate::client::{RelayClient, RelayClientBuilder};
    pub use crate::config::RelayConfig;
    pub use crate::core::envelope::{Envelope, Kind, Payload, Value};
    pub use crate::core::error::{RelayError, RelayResult};
    pub use crate::core::metrics::RelayMetrics;
    pub use crate::server::{
        MessageHandler, RelayServer, RelayServerBuilder, RoomRegistry, Session,
    };
    pub use crate::store::{MemoryStore, MessageStore, SqliteMessageStore};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
