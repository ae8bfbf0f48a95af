mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use beacon_gateway::{GatewayClient, GatewayConfig, PresenceCache, PresenceWatcher};
use beacon_store::{MemoryBackend, SqliteBackend, StatusStore};

use crate::config::{Config, StoreKind};

/// Buffered source events between the gateway client and the watcher.
const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_server=debug,beacon_api=debug,beacon_store=info,beacon_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Status store
    let store = match &config.store {
        StoreKind::Memory => {
            info!("Using in-memory status store");
            StatusStore::new(Arc::new(MemoryBackend::new()))
        }
        StoreKind::Sqlite(path) => StatusStore::new(Arc::new(SqliteBackend::open(path)?)),
    };
    store.reset().await;

    // Presence side: the gateway client feeds the watcher over a channel
    let cache = PresenceCache::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

    let mut gateway_config = GatewayConfig::new(config.discord_token.clone(), config.target);
    gateway_config.url = config.gateway_url.clone();
    let client = GatewayClient::new(gateway_config, cache.clone(), events_tx);
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = client.run().await {
            error!("Gateway client stopped: {}", e);
        }
    });

    let watcher = PresenceWatcher::new(config.target, store.clone(), Arc::new(cache));
    let watcher_task = tokio::spawn(watcher.run(events_rx, config.reconcile_every));

    // Read side
    let app = beacon_api::router(store).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Beacon listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway_task.abort();
    watcher_task.abort();
    info!("Beacon stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
