//! Typed message dispatch
//!
//! Every inbound text frame goes through one pipeline:
//!
//! 1. Parse the envelope. Invalid frames are counted and discarded; the
//!    peer never sees an error frame.
//! 2. Forward the parsed envelope to the long-polling bridge, if attached.
//! 3. Invoke the application handlers with `(session, type, payload)`.
//!
//! Handlers are registered under an endpoint label (e.g. `"/chat"`). The
//! label is purely logical for now: every registered handler sees every
//! message, ready for path-based routing once the upgrade exposes the
//! request path.

use crate::bridge::LongPollBridge;
use crate::core::envelope::{Envelope, Payload};
use crate::core::metrics::RelayMetrics;
use crate::server::session::Session;
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Application-side hooks for one logical endpoint.
///
/// Only `on_message` is mandatory; the lifecycle and binary hooks default
/// to no-ops.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// A session finished its handshake.
    async fn on_open(&self, session: &Arc<Session>) {
        let _ = session;
    }

    /// A session closed; it is already out of every room.
    async fn on_close(&self, session: &Arc<Session>) {
        let _ = session;
    }

    /// A typed envelope arrived.
    async fn on_message(&self, session: &Arc<Session>, message_type: &str, payload: &Payload);

    /// A binary frame arrived. Binary frames bypass the envelope codec.
    async fn on_binary(&self, session: &Arc<Session>, bytes: &[u8]) {
        let _ = (session, bytes);
    }
}

struct Route {
    endpoint: String,
    handler: Arc<dyn MessageHandler>,
}

/// Fans inbound frames out to the bridge and the registered handlers.
pub struct Dispatcher {
    routes: Vec<Route>,
    bridge: Option<Arc<LongPollBridge>>,
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self {
            routes: Vec::new(),
            bridge: None,
            metrics,
        }
    }

    /// Register a handler under a logical endpoint label.
    pub fn add_route(&mut self, endpoint: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.routes.push(Route {
            endpoint: endpoint.into(),
            handler,
        });
    }

    /// Attach the long-polling bridge; every parsed envelope is forwarded
    /// to it from then on.
    pub fn attach_bridge(&mut self, bridge: Arc<LongPollBridge>) {
        self.bridge = Some(bridge);
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Process one inbound text frame.
    pub async fn dispatch_text(&self, session: &Arc<Session>, text: &str) {
        self.metrics.messages_in_total.fetch_add(1, Ordering::Relaxed);

        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    connection_id = %session.connection_id(),
                    error = %err,
                    "discarding invalid envelope"
                );
                return;
            }
        };

        if let Some(bridge) = &self.bridge {
            bridge.on_ws_message(&envelope);
        }

        self.dispatch_envelope(session, &envelope).await;
    }

    async fn dispatch_envelope(&self, session: &Arc<Session>, envelope: &Envelope) {
        for route in &self.routes {
            tracing::trace!(
                endpoint = %route.endpoint,
                message_type = %envelope.message_type,
                "invoking handler"
            );
            route
                .handler
                .on_message(session, &envelope.message_type, &envelope.payload)
                .await;
        }
    }

    /// Run the open hooks.
    pub async fn dispatch_open(&self, session: &Arc<Session>) {
        for route in &self.routes {
            route.handler.on_open(session).await;
        }
    }

    /// Run the close hooks.
    pub async fn dispatch_close(&self, session: &Arc<Session>) {
        for route in &self.routes {
            route.handler.on_close(session).await;
        }
    }

    /// Hand a binary frame to the handlers unchanged.
    pub async fn dispatch_binary(&self, session: &Arc<Session>, bytes: &[u8]) {
        for route in &self.routes {
            route.handler.on_binary(session, bytes).await;
        }
    }
}
