//! Room-based chat on top of the typed dispatcher
//!
//! The protocol is carried entirely in the payload:
//!
//! ```json
//! {"type": "chat.join",    "payload": {"user": "alice", "room": "africa"}}
//! {"type": "chat.leave",   "payload": {"user": "alice", "room": "africa"}}
//! {"type": "chat.message", "payload": {"user": "alice", "room": "africa", "text": "hi"}}
//! ```
//!
//! On join the last [`HISTORY_LIMIT`] stored messages of the room are sent
//! back to the joining session, newest-first, tagged `kind=history`; a
//! `chat.system` announcement is then appended and broadcast to the room.
//! Unknown message types are appended and broadcast globally.
//!
//! Durability trade-off: when the store append fails, the error is logged
//! and counted but the broadcast still goes out. Live traffic wins; history
//! may omit the message.

use crate::core::envelope::{Envelope, Kind, Payload};
use crate::core::metrics::RelayMetrics;
use crate::server::dispatcher::MessageHandler;
use crate::server::registry::RoomRegistry;
use crate::server::session::Session;
use crate::store::MessageStore;
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// How many stored messages are replayed to a joining session.
pub const HISTORY_LIMIT: usize = 50;

/// The reference chat application.
pub struct ChatApp {
    store: Arc<dyn MessageStore>,
    registry: Arc<RoomRegistry>,
    metrics: Arc<RelayMetrics>,
}

impl ChatApp {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<RoomRegistry>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    fn user(payload: &Payload) -> String {
        match payload.get_str("user") {
            Some(user) if !user.is_empty() => user.to_string(),
            _ => "anonymous".to_string(),
        }
    }

    /// Append an envelope; on failure count the error and keep the original
    /// so the broadcast still happens.
    async fn append_best_effort(&self, envelope: Envelope) -> Envelope {
        match self.store.append(envelope.clone()).await {
            Ok(stored) => stored,
            Err(err) => {
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %err, "store append failed, broadcasting anyway");
                envelope
            }
        }
    }

    fn broadcast_room(&self, room: &str, envelope: &Envelope) {
        match envelope.to_json() {
            Ok(text) => {
                self.registry.broadcast_room_text(room, &text);
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize broadcast envelope");
            }
        }
    }

    async fn handle_join(&self, session: &Arc<Session>, payload: &Payload) {
        let Some(room) = payload.get_str("room").filter(|r| !r.is_empty()) else {
            tracing::debug!(
                connection_id = %session.connection_id(),
                "chat.join without a room, ignoring"
            );
            return;
        };
        let room = room.to_string();
        let user = Self::user(payload);

        self.registry.join(session, &room);

        // Replay history to the joining session only, newest-first.
        match self.store.list_by_room(&room, HISTORY_LIMIT, None).await {
            Ok(history) => {
                for mut envelope in history {
                    envelope.kind = Kind::History;
                    match envelope.to_json() {
                        Ok(text) => session.send_text(text),
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize history envelope");
                        }
                    }
                }
            }
            Err(err) => {
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!(room = %room, error = %err, "history fetch failed");
            }
        }

        let announcement = Envelope::new(
            "chat.system",
            Payload::new()
                .with("user", user.clone())
                .with("text", format!("{} joined {}", user, room)),
        )
        .with_room(&room)
        .with_kind(Kind::System);

        let stored = self.append_best_effort(announcement).await;
        self.broadcast_room(&room, &stored);
    }

    async fn handle_leave(&self, session: &Arc<Session>, payload: &Payload) {
        let Some(room) = payload.get_str("room").filter(|r| !r.is_empty()) else {
            return;
        };
        let room = room.to_string();
        let user = Self::user(payload);

        self.registry.leave(session, &room);

        let announcement = Envelope::new(
            "chat.system",
            Payload::new()
                .with("user", user.clone())
                .with("text", format!("{} left {}", user, room)),
        )
        .with_room(&room)
        .with_kind(Kind::System);

        let stored = self.append_best_effort(announcement).await;
        self.broadcast_room(&room, &stored);
    }

    async fn handle_message(&self, session: &Arc<Session>, payload: &Payload) {
        let room = payload.get_str("room").unwrap_or_default().to_string();
        let text = payload.get_str("text").unwrap_or_default();
        if room.is_empty() || text.is_empty() {
            tracing::debug!(
                connection_id = %session.connection_id(),
                "chat.message without room or text, ignoring"
            );
            return;
        }

        let envelope = Envelope::new("chat.message", payload.clone()).with_room(&room);
        let stored = self.append_best_effort(envelope).await;
        self.broadcast_room(&room, &stored);
    }

    async fn handle_other(&self, message_type: &str, payload: &Payload) {
        let envelope = Envelope::new(message_type, payload.clone());
        let stored = self.append_best_effort(envelope).await;
        match stored.to_json() {
            Ok(text) => {
                self.registry.broadcast_text(&text);
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize broadcast envelope");
            }
        }
    }
}

#[async_trait]
impl MessageHandler for ChatApp {
    async fn on_message(&self, session: &Arc<Session>, message_type: &str, payload: &Payload) {
        match message_type {
            "chat.join" => self.handle_join(session, payload).await,
            "chat.leave" => self.handle_leave(session, payload).await,
            "chat.message" => self.handle_message(session, payload).await,
            _ => self.handle_other(message_type, payload).await,
        }
    }

    async fn on_close(&self, session: &Arc<Session>) {
        // Room cleanup happens in the registry on unregister; nothing else
        // to tear down per session.
        tracing::trace!(connection_id = %session.connection_id(), "chat session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    fn app() -> (ChatApp, Arc<MemoryStore>, Arc<RoomRegistry>, Arc<RelayMetrics>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoomRegistry::new());
        let metrics = Arc::new(RelayMetrics::new());
        let app = ChatApp::new(store.clone(), registry.clone(), metrics.clone());
        (app, store, registry, metrics)
    }

    fn session(name: &str) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(Session::new(name.to_string(), tx)), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(Envelope::parse(&text).unwrap());
        }
        out
    }

    fn join_payload(user: &str, room: &str) -> Payload {
        Payload::new().with("user", user).with("room", room)
    }

    #[tokio::test]
    async fn test_join_replays_history_newest_first_then_announces() {
        let (app, store, _, _) = app();
        for text in ["a", "b", "c"] {
            store
                .append(
                    Envelope::new("chat.message", Payload::new().with("text", text))
                        .with_room("general"),
                )
                .await
                .unwrap();
        }

        let (s1, mut rx) = session("s1");
        app.on_message(&s1, "chat.join", &join_payload("alice", "general"))
            .await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 4);

        // Three history envelopes, newest first.
        let texts: Vec<&str> = frames[..3]
            .iter()
            .map(|e| e.payload.get_str("text").unwrap())
            .collect();
        assert_eq!(texts, vec!["c", "b", "a"]);
        assert!(frames[..3].iter().all(|e| e.kind == Kind::History));

        // Then the join announcement, broadcast to the room we just joined.
        assert_eq!(frames[3].message_type, "chat.system");
        assert_eq!(frames[3].kind, Kind::System);
        assert_eq!(frames[3].room, "general");
        assert!(frames[3]
            .payload
            .get_str("text")
            .unwrap()
            .contains("alice joined general"));
    }

    #[tokio::test]
    async fn test_join_defaults_user_to_anonymous() {
        let (app, _, _, _) = app();
        let (s1, mut rx) = session("s1");

        app.on_message(&s1, "chat.join", &Payload::new().with("room", "general"))
            .await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.get_str("user"), Some("anonymous"));
    }

    #[tokio::test]
    async fn test_join_without_room_is_ignored() {
        let (app, store, registry, _) = app();
        let (s1, mut rx) = session("s1");

        app.on_message(&s1, "chat.join", &Payload::new().with("user", "alice"))
            .await;

        assert!(drain(&mut rx).is_empty());
        assert!(registry.rooms().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_message_appends_and_broadcasts_to_room() {
        let (app, store, _, _) = app();
        let (s1, mut rx1) = session("s1");
        let (s2, mut rx2) = session("s2");

        app.on_message(&s1, "chat.join", &join_payload("u1", "africa"))
            .await;
        app.on_message(&s2, "chat.join", &join_payload("u2", "africa"))
            .await;
        drain(&mut rx1);
        drain(&mut rx2);

        app.on_message(
            &s1,
            "chat.message",
            &Payload::new()
                .with("user", "u1")
                .with("room", "africa")
                .with("text", "hello"),
        )
        .await;

        for rx in [&mut rx1, &mut rx2] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].message_type, "chat.message");
            assert_eq!(frames[0].room, "africa");
            assert_eq!(frames[0].payload.get_str("text"), Some("hello"));
            assert!(!frames[0].id.is_empty(), "broadcast carries the stored id");
        }

        let rows = store.list_by_room("africa", 10, None).await.unwrap();
        assert_eq!(rows[0].message_type, "chat.message");
        assert_eq!(rows[0].payload.get_str("text"), Some("hello"));
    }

    #[tokio::test]
    async fn test_message_requires_room_and_text() {
        let (app, store, _, _) = app();
        let (s1, mut rx) = session("s1");
        app.on_message(&s1, "chat.join", &join_payload("u1", "africa"))
            .await;
        drain(&mut rx);
        let stored_before = store.len().await;

        app.on_message(
            &s1,
            "chat.message",
            &Payload::new().with("room", "africa"),
        )
        .await;
        app.on_message(&s1, "chat.message", &Payload::new().with("text", "x"))
            .await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(store.len().await, stored_before);
    }

    #[tokio::test]
    async fn test_message_does_not_cross_rooms() {
        let (app, _, _, _) = app();
        let (s1, mut rx1) = session("s1");
        let (s2, mut rx2) = session("s2");

        app.on_message(&s1, "chat.join", &join_payload("u1", "a")).await;
        app.on_message(&s2, "chat.join", &join_payload("u2", "b")).await;
        drain(&mut rx1);
        drain(&mut rx2);

        app.on_message(
            &s1,
            "chat.message",
            &Payload::new().with("room", "a").with("text", "x"),
        )
        .await;

        assert_eq!(drain(&mut rx1).len(), 1);
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_leave_stops_delivery_and_announces() {
        let (app, _, registry, _) = app();
        let (s1, mut rx1) = session("s1");
        let (s2, mut rx2) = session("s2");

        app.on_message(&s1, "chat.join", &join_payload("u1", "r")).await;
        app.on_message(&s2, "chat.join", &join_payload("u2", "r")).await;
        drain(&mut rx1);
        drain(&mut rx2);

        app.on_message(&s1, "chat.leave", &join_payload("u1", "r")).await;

        // s1 left before the announcement broadcast, so only s2 sees it.
        assert!(drain(&mut rx1).is_empty());
        let frames = drain(&mut rx2);
        assert_eq!(frames.len(), 1);
        assert!(frames[0]
            .payload
            .get_str("text")
            .unwrap()
            .contains("u1 left r"));
        assert_eq!(registry.member_count("r"), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_broadcasts_globally() {
        let (app, store, registry, _) = app();
        let (s1, mut rx1) = session("s1");
        let (s2, mut rx2) = session("s2");
        registry.register(&s1);
        registry.register(&s2);

        app.on_message(&s1, "presence.ping", &Payload::new().with("user", "u1"))
            .await;

        for rx in [&mut rx1, &mut rx2] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].message_type, "presence.ping");
            assert!(frames[0].room.is_empty());
        }

        // Stored as a global (room-less) row.
        let replay = store.replay_from("", 10).await.unwrap();
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].room, "");
    }

    #[tokio::test]
    async fn test_rejoin_is_idempotent() {
        let (app, _, registry, _) = app();
        let (s1, mut rx) = session("s1");

        app.on_message(&s1, "chat.join", &join_payload("u1", "r")).await;
        app.on_message(&s1, "chat.join", &join_payload("u1", "r")).await;
        drain(&mut rx);

        assert_eq!(registry.member_count("r"), 1);
    }
}
