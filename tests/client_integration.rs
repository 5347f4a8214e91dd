//! Integration tests for the client library against a real server.

use relay::app::ChatApp;
use relay::client::RelayClient;
use relay::config::RelayConfig;
use relay::core::envelope::{Envelope, Payload};
use relay::core::metrics::RelayMetrics;
use relay::server::{RelayServerBuilder, RoomRegistry};
use relay::store::{MemoryStore, MessageStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn start_server() -> SocketAddr {
    let metrics = Arc::new(RelayMetrics::new());
    let registry = Arc::new(RoomRegistry::new());
    let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new());

    let chat = ChatApp::new(store.clone(), registry.clone(), metrics.clone());
    let server = RelayServerBuilder::new()
        .with_config(RelayConfig::default())
        .with_store(store)
        .with_metrics(metrics)
        .with_registry(registry)
        .ws("/chat", Arc::new(chat))
        .build()
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server.serve_on(listener).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

async fn recv_envelope(rx: &mut mpsc::UnboundedReceiver<String>) -> Envelope {
    let text = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timeout waiting for client message")
        .expect("Channel closed");
    Envelope::parse(&text).unwrap()
}

#[tokio::test]
async fn test_client_joins_and_receives_announcement() {
    let addr = start_server().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = RelayClient::builder(format!("ws://{}/ws", addr))
        .on_message(move |text| {
            let _ = tx.send(text);
        })
        .connect();

    client
        .send_json(
            "chat.join",
            Payload::new().with("user", "alice").with("room", "general"),
        )
        .unwrap();

    let announcement = recv_envelope(&mut rx).await;
    assert_eq!(announcement.message_type, "chat.system");
    assert!(announcement
        .payload
        .get_str("text")
        .unwrap()
        .contains("alice joined general"));

    client.close().await;
}

#[tokio::test]
async fn test_frames_sent_before_connect_are_flushed() {
    let addr = start_server().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = RelayClient::builder(format!("ws://{}/ws", addr))
        .on_message(move |text| {
            let _ = tx.send(text);
        })
        .connect();

    // Enqueue immediately; the handshake races with this send.
    client
        .send_json(
            "chat.join",
            Payload::new().with("user", "early").with("room", "r"),
        )
        .unwrap();
    client
        .send_json(
            "chat.message",
            Payload::new()
                .with("user", "early")
                .with("room", "r")
                .with("text", "queued"),
        )
        .unwrap();

    // Join announcement, then our own message echoed back to the room.
    let first = recv_envelope(&mut rx).await;
    assert_eq!(first.message_type, "chat.system");
    let second = recv_envelope(&mut rx).await;
    assert_eq!(second.message_type, "chat.message");
    assert_eq!(second.payload.get_str("text"), Some("queued"));

    client.close().await;
}

#[tokio::test]
async fn test_open_and_close_callbacks_fire() {
    let addr = start_server().await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let open_tx = events_tx.clone();
    let close_tx = events_tx;

    let client = RelayClient::builder(format!("ws://{}/ws", addr))
        .on_open(move || {
            let _ = open_tx.send("open");
        })
        .on_close(move || {
            let _ = close_tx.send("close");
        })
        .connect();

    let first = timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, "open");

    client.close().await;
    let second = timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, "close");
}
