//! Meshpoint daemon -- headless fleet runtime.
//!
//! Usage:
//!
//!   meshpoint-daemon [OPTIONS]
//!
//! Options:
//!
//!   --data-dir <PATH>       Data directory (default: meshpoint-data)
//!   --server <ADDR>         Broker connection string
//!   --auth-token <TOKEN>    Shared secret for privileged subjects
//!   --schedule-tick <SECS>  Schedule sweeper period (default: 5)
//!   --metrics-period <SECS> Metrics report period (default: 60)
//!   --config <PATH>         Load config from JSON file
//!
//! The daemon runs until interrupted with Ctrl+C (SIGINT/SIGTERM).

use std::sync::Arc;

use meshpoint_bus::Bus;
use meshpoint_node::StoreService;
use meshpoint_storage::StoreEngine;
use meshpoint_types::config::AppConfig;

mod config;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Tracing / logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = config::CliArgs::parse_from_env();

    let file_config = match &cli.config_path {
        Some(path) => match config::DaemonConfig::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!("failed to load config file: {e}");
                std::process::exit(1);
            }
        },
        None => config::DaemonConfig::default(),
    };
    let app_config = file_config.resolve(&cli);

    if let Err(e) = run_daemon(app_config).await {
        tracing::error!("daemon error: {e}");
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Daemon main logic
// ---------------------------------------------------------------------------

async fn run_daemon(config: AppConfig) -> Result<(), String> {
    config.validate().map_err(|e| e.to_string())?;

    tracing::info!(
        data_dir = %config.data_dir.display(),
        schedule_tick_secs = config.schedule_tick_secs,
        "starting meshpoint daemon"
    );

    let store =
        Arc::new(StoreEngine::open(&config.data_dir).map_err(|e| e.to_string())?);
    let bus = Bus::new();

    let service = StoreService::new(store, bus.clone(), config);
    let handle = service.start().map_err(|e| e.to_string())?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {e}"))?;
    tracing::info!("shutdown signal received");

    handle.shutdown().await;
    bus.close();

    Ok(())
}
