//! s3view plugin host — loads plugin modules, keeps them hot-reloaded, and
//! runs until asked to stop.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use s3view_core::config::AppConfig;
use s3view_core::error::AppError;
use s3view_plugin::{PluginLoader, PluginRegistry};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Plugin host error");
        std::process::exit(1);
    }
}

/// Load configuration from `S3VIEW_CONFIG_DIR` (default `config/`) with the
/// `S3VIEW_ENV` overlay (default `development`).
fn load_configuration() -> Result<AppConfig, AppError> {
    let dir = std::env::var("S3VIEW_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let env = std::env::var("S3VIEW_ENV").unwrap_or_else(|_| "development".to_string());

    AppConfig::load_from(&PathBuf::from(dir), &env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting s3view plugin host v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();
    let registry = Arc::new(PluginRegistry::new());
    let loader = PluginLoader::new(config.plugins.clone(), Arc::clone(&registry));

    let loaded = loader.load_plugins(&shutdown).await?;
    tracing::info!(loaded, "Plugins loaded");

    let stats = loader.get_plugin_statistics().await;
    tracing::info!(statistics = %serde_json::to_string(&stats)?, "Plugin statistics");

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, unloading plugins...");

    shutdown.cancel();
    loader.shutdown().await;

    tracing::info!("Plugin host stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
