//! Chargelink central system
//!
//! OCPP 1.6 WebSocket server for managing EV charging stations.
//! Reads configuration from a TOML file (~/.config/chargelink/config.toml).

use tracing::{error, info};

use chargelink::shutdown::ShutdownCoordinator;
use chargelink::{default_config_path, AppConfig, CentralSystem};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = std::env::var("CHARGELINK_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let config = match AppConfig::load(&config_path) {
        Ok(config) => {
            init_tracing(&config.logging.level);
            info!("Configuration loaded from {}", config_path.display());
            config
        }
        Err(e) => {
            let config = AppConfig::default();
            init_tracing(&config.logging.level);
            error!("Failed to load config: {}. Using defaults.", e);
            config
        }
    };

    info!("Starting Chargelink Central System...");

    // ── Shutdown coordination ──────────────────────────────────
    let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout_secs);
    let shutdown_signal = shutdown.signal();
    shutdown.start_signal_listener();

    // ── Server ─────────────────────────────────────────────────
    let server = CentralSystem::new(config).with_shutdown(shutdown_signal.clone());

    let server_task = tokio::spawn(async move { server.run().await });

    match server_task.await {
        Ok(Ok(())) => info!("WebSocket server stopped"),
        Ok(Err(e)) => error!("WebSocket server error: {}", e),
        Err(e) => error!("WebSocket server task panicked: {}", e),
    }

    info!("Chargelink Central System shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}
