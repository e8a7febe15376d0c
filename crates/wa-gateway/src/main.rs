//! wa-gateway: multi-tenant WhatsApp auto-reply gateway
//!
//! Usage:
//!   wa-gateway                  - Start the gateway (HTTP API + bridge webhook)
//!   wa-gateway --config <path>  - Start with an explicit config file
//!   wa-gateway --help           - Show help

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use wa_api::{AppState, QrCache};
use wa_bot::{BridgeClientFactory, CredentialStore, EventRouter, SessionManager, webhook_routes};
use wa_core::{Config, EventNotifier, SqliteReplyRepository};

/// Run mode
enum RunMode {
    /// Start the gateway, optionally with a config file
    Server { config_path: Option<String> },
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = match parse_args()? {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("wa-gateway {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server { config_path } => config_path,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let config = match config_path {
        Some(path) => Config::from_toml_file(&path),
        None => Config::load(),
    }
    .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting wa-gateway...");
    tracing::info!("Bridge: {}", config.bridge.base_url);

    run_server(config).await
}

/// Parse command line arguments
fn parse_args() -> anyhow::Result<RunMode> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config_path = Some(path);
            }
            other => anyhow::bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(RunMode::Server { config_path })
}

/// Print help message
fn print_help() {
    println!("wa-gateway - multi-tenant WhatsApp auto-reply gateway");
    println!();
    println!("Usage:");
    println!("  wa-gateway                  Start the gateway");
    println!("  wa-gateway --config <path>  Use the given config file instead of wa-gateway.toml");
    println!("  wa-gateway --help           Show this help message");
    println!("  wa-gateway --version        Show version");
    println!();
    println!("Environment Variables:");
    println!("  API_PORT              HTTP API port (default: 3000)");
    println!("  API_ALLOWED_ORIGINS   Comma-separated CORS origins (default: any)");
    println!("  DB_PATH               SQLite database with prompts and replies");
    println!("  BRIDGE_URL            WhatsApp bridge base URL (default: http://localhost:21465)");
    println!("  BRIDGE_TOKEN          Bearer token shared with the bridge (optional)");
    println!("  BRIDGE_WEBHOOK_URL    Public base URL of this gateway for bridge callbacks");
    println!("  AUTH_DIR              Directory for tenant credentials (default: .wa_auth)");
    println!("  CLEANUP_MAX_ATTEMPTS  Attempts at deleting busy credentials (default: 10)");
    println!("  CLEANUP_BACKOFF_MS    Delay between deletion attempts (default: 1000)");
    println!("  EVENTS_CAPACITY       Lifecycle event buffer per subscriber (default: 256)");
    println!("  RUST_LOG              Log filter (default: info)");
}

/// Run the gateway until Ctrl+C
async fn run_server(config: Config) -> anyhow::Result<()> {
    let replies = SqliteReplyRepository::new(&config.database.path)
        .map_err(|e| anyhow::anyhow!("Failed to open reply database: {}", e))?;
    tracing::info!("Reply database: {}", config.database.path);

    let notifier = EventNotifier::new(config.events.capacity);
    let router = EventRouter::new();
    let factory = BridgeClientFactory::new(&config.bridge, router.clone())
        .map_err(|e| anyhow::anyhow!("Bridge config error: {}", e))?;
    let credentials = CredentialStore::from_config(&config.session);
    tracing::info!("Tenant credentials under {}", credentials.root().display());

    let manager = SessionManager::new(Arc::new(factory), Arc::new(replies), notifier.clone(), credentials);

    let qr_cache = QrCache::new();
    let qr_task = qr_cache.spawn(&notifier);

    let app = wa_api::app(
        AppState::new(Arc::clone(&manager), qr_cache),
        &config.api,
        webhook_routes(router, config.bridge.token.clone()),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let api_config = config.api.clone();
    let server = tokio::spawn(async move {
        let shutdown = async move {
            shutdown_rx.await.ok();
        };
        if let Err(e) = wa_api::start_server(&api_config, app, shutdown).await {
            tracing::error!("HTTP API error: {}", e);
        }
    });

    tracing::info!("wa-gateway initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    // Disconnect tenants while the webhook can still receive bridge callbacks
    manager.shutdown_all().await;

    shutdown_tx.send(()).ok();
    if let Err(e) = server.await {
        tracing::warn!("HTTP API task failed: {}", e);
    }
    qr_task.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
