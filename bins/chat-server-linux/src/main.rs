use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chat_core::{
    ChatSettings, IdentityGenerator, JsonFileStorage, MessageStore, Persistence, SystemClock,
    ThreadSpawner,
};
use chat_server::{ChatHub, ClientRegistry, RegistryConfig, StreamTimings};
use chat_web::{create_router, ServerState};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Durable namespace holding the message history.
const STORAGE_NAMESPACE: &str = "chat";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,chat_server=debug,chat_web=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Chat server starting...");

    // Configuration
    let config_path =
        PathBuf::from(std::env::var("CHAT_CONFIG").unwrap_or_else(|_| "chat-settings.json".into()));
    let settings = ChatSettings::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.bind_addr))?;

    let hub = Arc::new(build_hub(&settings)?);

    let mut state = ServerState::new(hub.clone(), settings.delivery);
    if let Some(root) = &settings.web_root {
        state = state.with_web_root(root);
    }
    let app = create_router(Arc::new(state)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    tracing::info!("   Delivery:  {:?}", settings.delivery);
    tracing::info!("   Identity:  curl http://{}/api/chat/uuid", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await?;

    // Posts accepted while connections drained
    match hub.store().flush() {
        Ok(flushed) => tracing::info!("Flushed {} messages", flushed),
        Err(e) => tracing::error!("Final save failed: {}", e),
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wire the store, persistence and streaming registry together.
fn build_hub(settings: &ChatSettings) -> anyhow::Result<ChatHub> {
    let clock = Arc::new(SystemClock);

    let storage = JsonFileStorage::open(&settings.data_dir, STORAGE_NAMESPACE)
        .with_context(|| format!("opening storage in {}", settings.data_dir.display()))?;
    tracing::info!("Message storage: {}", storage.path().display());

    let store = MessageStore::with_persistence(
        settings.store_config(),
        clock.clone(),
        Persistence::new(Arc::new(storage)),
        settings.persistence,
        Arc::new(ThreadSpawner),
    );
    match store.restore_from_storage() {
        Ok(loaded) => tracing::info!("Restored {} messages", loaded),
        Err(e) => tracing::warn!("Starting with empty history: {}", e),
    }

    let registry = ClientRegistry::new(
        RegistryConfig::from_settings(&settings.stream, settings.lock_timeout()),
        clock,
    );

    Ok(ChatHub::new(
        store,
        registry,
        IdentityGenerator::default(),
        StreamTimings::from(&settings.stream),
    ))
}

/// Resolves on Ctrl+C after closing every event stream.
///
/// Open streams hold their connections for up to their full lifetime, so
/// they must end before the server can finish draining.
async fn shutdown_signal(hub: Arc<ChatHub>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down...");

    if let Err(e) = hub.shutdown() {
        tracing::error!("Saving messages failed: {}", e);
    }
}
