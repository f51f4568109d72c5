// API Server Binary Entry Point
//
// Purpose: Start the Axum server for recipe solving and batch analysis
// Usage: cargo run --bin api_server
//
// Environment: PORT, VISION_URL, VISION_TIMEOUT_SECS, DEBOUNCE_MS, TOLERANCES_PATH

use npk_mixer::config::ServerConfig;
use npk_mixer::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (structured logging)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    // Default log level: info for our crate, warn for others
                    "npk_mixer=info,tower_http=debug,axum=debug,warn".into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting API server...");

    let config = ServerConfig::from_env()?;

    tracing::info!("Configuration:");
    tracing::info!("  PORT: {}", config.port);
    tracing::info!("  VISION_URL: {}", config.vision_url);
    tracing::info!("  VISION_TIMEOUT: {:?}", config.vision_timeout);
    tracing::info!("  DEBOUNCE: {:?}", config.debounce);
    tracing::info!("  TOLERANCES: {:?}", config.tolerances);

    let state = AppState::new(&config)?;
    tracing::info!("Application state initialized successfully");

    // Create router with all endpoints and middleware
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .await?;

    Ok(())
}
