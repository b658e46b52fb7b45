//! HLS Assembler
//!
//! Turns a segmented HLS recording into downloadable artifacts: the
//! losslessly assembled media file, an encoded audio track and, optionally,
//! a speech transcript. Each job works in its own disposable workspace that
//! is deleted once the artifacts expire.

mod clock;
mod config;
mod config_file;
mod error;
mod ffmpeg;
mod http;
mod integration;
mod job;
mod lookup;
mod net;
mod pipeline;
mod playlist;
mod segment;
mod state;
mod transcode;
mod transcribe;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{JobError, Result};
use crate::http::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "hls-assembler";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("--generate-config") {
        let path = args.get(2).map(String::as_str).unwrap_or("config.toml");
        config_file::generate_default_config(path)
            .map_err(|e| JobError::Config(format!("failed to write {}: {}", path, e)))?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    // Load configuration
    let config_path = args.get(1).cloned().unwrap_or_else(|| "config.toml".to_string());
    let (config, load_warning) = config_file::load_server_config(&config_path);

    init_logging(&config.log_level, &config.log_format);
    if let Some(warning) = load_warning {
        tracing::warn!("{}", warning);
    }

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::info!("Configuration loaded: {:?}", config);

    // Create application state
    let state = Arc::new(AppState::from_config(config.clone())?);
    let orphans = state.store.purge_orphans().await;
    if orphans > 0 {
        tracing::info!("Removed {} workspace(s) left by a previous run", orphans);
    }
    let sweeper = state.spawn_sweeper();

    // Build router
    let app = create_router(state.clone());

    // Start server
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| JobError::Config(format!("invalid listen address {}: {}", config.socket_addr(), e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
            shutdown_state.shutdown();
        })
        .await?;

    state.shutdown();
    if let Err(e) = sweeper.await {
        tracing::warn!("Job sweeper ended abnormally: {}", e);
    }
    tracing::info!("{} stopped", APP_NAME);

    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("hls_assembler={},tower_http={}", level, level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
