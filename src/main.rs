//! relay server binary
//!
//! Usage: `relay [config.yaml]`
//!
//! Missing config file argument means pure defaults (port 9090, sqlite
//! store at `relay.db`). Any startup failure (config, store open, port
//! bind) exits non-zero.

use anyhow::Result;
use relay::app::ChatApp;
use relay::config::RelayConfig;
use relay::core::metrics::RelayMetrics;
use relay::server::{RelayServerBuilder, RoomRegistry};
use relay::store::{MessageStore, SqliteMessageStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RelayConfig::from_yaml_file(&path)?,
        None => RelayConfig::default(),
    };

    let store: Arc<dyn MessageStore> =
        Arc::new(SqliteMessageStore::open(&config.storage.path).await?);
    let metrics = Arc::new(RelayMetrics::new());
    let registry = Arc::new(RoomRegistry::new());
    let chat = ChatApp::new(store.clone(), registry.clone(), metrics.clone());

    let server = RelayServerBuilder::new()
        .with_config(config)
        .with_store(store)
        .with_metrics(metrics)
        .with_registry(registry)
        .ws("/chat", Arc::new(chat))
        .build()?;

    server.serve().await
}
