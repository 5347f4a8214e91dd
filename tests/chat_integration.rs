//! End-to-end tests for the chat application over real sockets
//!
//! Each test spins up a full relay server on an ephemeral port and drives
//! it with raw tokio-tungstenite clients (and reqwest for the HTTP
//! facade): connect → join → exchange envelopes → verify history, fan-out,
//! isolation, the long-polling fallback, and the idle timer.

use futures_util::{SinkExt, StreamExt};
use relay::app::ChatApp;
use relay::config::RelayConfig;
use relay::core::envelope::{Envelope, Payload};
use relay::core::metrics::RelayMetrics;
use relay::server::{RelayServerBuilder, RoomRegistry, ServerState};
use relay::store::{MemoryStore, MessageStore};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsWrite = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

struct TestRig {
    addr: SocketAddr,
    state: Arc<ServerState>,
    store: Arc<MemoryStore>,
}

/// Start a full server (chat app + long-polling) on an ephemeral port.
async fn start_server(config: RelayConfig) -> TestRig {
    let metrics = Arc::new(RelayMetrics::new());
    let registry = Arc::new(RoomRegistry::new());
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn MessageStore> = store.clone();

    let chat = ChatApp::new(store_dyn.clone(), registry.clone(), metrics.clone());
    let server = RelayServerBuilder::new()
        .with_config(config)
        .with_store(store_dyn)
        .with_metrics(metrics)
        .with_registry(registry)
        .ws("/chat", Arc::new(chat))
        .build()
        .unwrap();

    let state = server.state();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        server.serve_on(listener).await.unwrap();
    });

    // Small delay to let the server start accepting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestRig { addr, state, store }
}

async fn ws_connect(addr: SocketAddr) -> (WsWrite, WsRead) {
    let url = format!("ws://{}/ws", addr);
    let (stream, _) = connect_async(&url).await.expect("Failed to connect");
    stream.split()
}

async fn ws_send(write: &mut WsWrite, msg: &Value) {
    let text = serde_json::to_string(msg).unwrap();
    write.send(Message::Text(text)).await.unwrap();
}

async fn ws_recv(read: &mut WsRead) -> Value {
    let msg = timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Timeout waiting for WS message")
        .expect("Stream ended")
        .expect("WS error");

    match msg {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("Expected text message, got {:?}", other),
    }
}

/// Read and discard frames until nothing arrives for a short while.
async fn drain_pending(read: &mut WsRead) {
    while let Ok(Some(Ok(_))) = timeout(Duration::from_millis(200), read.next()).await {}
}

/// Assert that no text frame arrives within the window.
async fn expect_silence(read: &mut WsRead) {
    match timeout(Duration::from_millis(300), read.next()).await {
        Err(_) => {}
        Ok(frame) => panic!("Expected silence, got {:?}", frame),
    }
}

fn join_msg(user: &str, room: &str) -> Value {
    json!({"type": "chat.join", "payload": {"user": user, "room": room}})
}

fn chat_msg(user: &str, room: &str, text: &str) -> Value {
    json!({
        "type": "chat.message",
        "room": room,
        "payload": {"user": user, "room": room, "text": text}
    })
}

#[tokio::test]
async fn test_join_replays_history_then_announces() {
    let rig = start_server(RelayConfig::default()).await;

    // Seed three messages in `general` before anyone connects.
    for text in ["first", "second", "third"] {
        rig.store
            .append(
                Envelope::new("chat.message", Payload::new().with("text", text))
                    .with_room("general"),
            )
            .await
            .unwrap();
    }

    let (mut write, mut read) = ws_connect(rig.addr).await;
    ws_send(&mut write, &join_msg("alice", "general")).await;

    // Exactly three history envelopes, newest first.
    let mut texts = Vec::new();
    for _ in 0..3 {
        let frame = ws_recv(&mut read).await;
        assert_eq!(frame["kind"], "history");
        texts.push(frame["payload"]["text"].as_str().unwrap().to_string());
    }
    assert_eq!(texts, vec!["third", "second", "first"]);

    // Followed by the join announcement broadcast to the room.
    let announcement = ws_recv(&mut read).await;
    assert_eq!(announcement["type"], "chat.system");
    assert_eq!(announcement["kind"], "system");
    assert_eq!(announcement["room"], "general");
    assert!(announcement["payload"]["text"]
        .as_str()
        .unwrap()
        .contains("alice joined general"));
}

#[tokio::test]
async fn test_broadcast_fan_out_to_room_members() {
    let rig = start_server(RelayConfig::default()).await;

    let (mut w1, mut r1) = ws_connect(rig.addr).await;
    let (mut w2, mut r2) = ws_connect(rig.addr).await;
    let (mut w3, mut r3) = ws_connect(rig.addr).await;

    ws_send(&mut w1, &join_msg("u1", "africa")).await;
    ws_send(&mut w2, &join_msg("u2", "africa")).await;
    ws_send(&mut w3, &join_msg("u3", "africa")).await;

    // Let every join (history + system announcements) settle.
    for read in [&mut r1, &mut r2, &mut r3] {
        drain_pending(read).await;
    }

    ws_send(&mut w1, &chat_msg("u1", "africa", "hello")).await;

    for read in [&mut r1, &mut r2, &mut r3] {
        let frame = ws_recv(read).await;
        assert_eq!(frame["type"], "chat.message");
        assert_eq!(frame["room"], "africa");
        assert_eq!(frame["payload"]["text"], "hello");
    }

    // The message is durably stored for the room.
    let rows = rig.store.list_by_room("africa", 10, None).await.unwrap();
    let stored = rows
        .iter()
        .find(|row| row.message_type == "chat.message")
        .expect("chat.message row missing");
    assert_eq!(stored.room, "africa");
    assert_eq!(stored.payload.get_str("text"), Some("hello"));
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let rig = start_server(RelayConfig::default()).await;

    let (mut w1, mut r1) = ws_connect(rig.addr).await;
    let (mut w2, mut r2) = ws_connect(rig.addr).await;

    ws_send(&mut w1, &join_msg("u1", "a")).await;
    ws_send(&mut w2, &join_msg("u2", "b")).await;
    drain_pending(&mut r1).await;
    drain_pending(&mut r2).await;

    ws_send(&mut w1, &chat_msg("u1", "a", "x")).await;

    let frame = ws_recv(&mut r1).await;
    assert_eq!(frame["payload"]["text"], "x");

    expect_silence(&mut r2).await;
}

#[tokio::test]
async fn test_long_poll_fallback_buffers_broadcasts() {
    let rig = start_server(RelayConfig::default()).await;

    for text in ["t1", "t2"] {
        let envelope = Envelope::new("chat.message", Payload::new().with("text", text))
            .with_room("africa");
        rig.state
            .broadcast_room_text("africa", &envelope.to_json().unwrap());
    }

    let url = format!(
        "http://{}/ws/poll?session_id=room:africa&max=10",
        rig.addr
    );
    let body: Vec<Value> = reqwest::get(&url).await.unwrap().json().await.unwrap();
    let texts: Vec<&str> = body
        .iter()
        .map(|e| e["payload"]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["t1", "t2"]);

    // Nothing new: the next poll is empty.
    let body: Vec<Value> = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_global_broadcast_reaches_sessions_and_poll_mailbox() {
    let rig = start_server(RelayConfig::default()).await;

    let (_w1, mut r1) = ws_connect(rig.addr).await;
    let (_w2, mut r2) = ws_connect(rig.addr).await;
    // Wait until both connections are registered.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let envelope = Envelope::new("announce", Payload::new().with("text", "all hands"));
    let delivered = rig.state.broadcast_text(&envelope.to_json().unwrap());
    assert_eq!(delivered, 2);

    for read in [&mut r1, &mut r2] {
        let frame = ws_recv(read).await;
        assert_eq!(frame["type"], "announce");
        assert_eq!(frame["payload"]["text"], "all hands");
    }

    // Room-less envelopes land in the shared `broadcast` mailbox.
    let url = format!("http://{}/ws/poll?session_id=broadcast&max=10", rig.addr);
    let body: Vec<Value> = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0]["payload"]["text"], "all hands");
}

#[tokio::test]
async fn test_http_send_reaches_websocket_subscribers() {
    let rig = start_server(RelayConfig::default()).await;

    let (mut w1, mut r1) = ws_connect(rig.addr).await;
    ws_send(&mut w1, &join_msg("u1", "africa")).await;
    drain_pending(&mut r1).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/ws/send", rig.addr))
        .json(&json!({
            "type": "chat.message",
            "room": "africa",
            "payload": {"text": "hi"}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let ack: Value = response.json().await.unwrap();
    assert_eq!(ack["status"], "queued");
    assert_eq!(ack["session_id"], "room:africa");

    let frame = ws_recv(&mut r1).await;
    assert_eq!(frame["type"], "chat.message");
    assert_eq!(frame["room"], "africa");
    assert_eq!(frame["payload"]["text"], "hi");
}

#[tokio::test]
async fn test_idle_timeout_closes_and_cleans_up() {
    let mut config = RelayConfig::default();
    config.websocket.idle_timeout = 1;
    let rig = start_server(config).await;

    let (mut w1, mut r1) = ws_connect(rig.addr).await;
    ws_send(&mut w1, &join_msg("u1", "sleepy")).await;
    drain_pending(&mut r1).await;

    let metrics = rig.state.metrics();
    assert_eq!(metrics.connections_active.load(Ordering::Relaxed), 1);
    assert_eq!(rig.state.registry().member_count("sleepy"), 1);

    // Stay silent past the idle deadline; the server must close us.
    let closed = timeout(Duration::from_secs(3), async {
        loop {
            match r1.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server did not close the idle connection");

    // Give the close path a moment to run the sweep.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(metrics.connections_active.load(Ordering::Relaxed), 0);
    assert_eq!(rig.state.registry().member_count("sleepy"), 0);
}

#[tokio::test]
async fn test_invalid_envelopes_are_discarded_not_fatal() {
    let rig = start_server(RelayConfig::default()).await;

    let (mut write, mut read) = ws_connect(rig.addr).await;
    write
        .send(Message::Text("this is not json".to_string()))
        .await
        .unwrap();
    write
        .send(Message::Text(r#"{"payload":{"no":"type"}}"#.to_string()))
        .await
        .unwrap();

    // The connection survives and keeps working.
    ws_send(&mut write, &join_msg("alice", "general")).await;
    let announcement = ws_recv(&mut read).await;
    assert_eq!(announcement["type"], "chat.system");

    let errors = rig
        .state
        .metrics()
        .errors_total
        .load(Ordering::Relaxed);
    assert!(errors >= 2, "expected error counter to grow, got {}", errors);
}

#[tokio::test]
async fn test_server_stop_closes_sessions() {
    let rig = start_server(RelayConfig::default()).await;

    let (mut w1, mut r1) = ws_connect(rig.addr).await;
    ws_send(&mut w1, &join_msg("u1", "r")).await;
    drain_pending(&mut r1).await;
    assert_eq!(
        rig.state.metrics().connections_active.load(Ordering::Relaxed),
        1
    );

    rig.state.shutdown_token().cancel();

    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match r1.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server stop did not close the session");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        rig.state.metrics().connections_active.load(Ordering::Relaxed),
        0
    );
    assert_eq!(rig.state.registry().member_count("r"), 0);
}

#[tokio::test]
async fn test_metrics_endpoint_tracks_connections() {
    let rig = start_server(RelayConfig::default()).await;

    let (_w1, _r1) = ws_connect(rig.addr).await;
    // Wait until the server registered the connection.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let body = reqwest::get(format!("http://{}/metrics", rig.addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("relay_ws_connections_total 1"));
    assert!(body.contains("relay_ws_connections_active 1"));
}
