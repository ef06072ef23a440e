//! Chargelink charge point simulator
//!
//! Connects to a central system as an OCPP 1.6 charge point, registers via
//! BootNotification, keeps the heartbeat going and answers central-system
//! commands. Optionally runs one scripted charge cycle.
//!
//! ```sh
//! # Connect to a local central system
//! chargelink-cp --url ws://localhost:9000/ocpp --id CP001
//!
//! # Run a 30 second charge cycle after boot
//! chargelink-cp --id CP001 --charge-seconds 30
//! ```

use std::time::Duration;

use clap::Parser;
use log::{error, info};

use chargelink::charge_point::handlers::ChargePointCommand;
use chargelink::client::{ChargePoint, ChargePointConfig};
use chargelink::protocol::messages::Reason;
use chargelink::shutdown::ShutdownCoordinator;

/// OCPP 1.6 charge point simulator.
#[derive(Parser, Debug)]
#[command(
    name = "chargelink-cp",
    version,
    about = "OCPP 1.6 charge point simulator"
)]
struct Cli {
    /// Central system base URL; the charge point id is appended.
    #[arg(long, default_value = "ws://localhost:9000/ocpp")]
    url: String,

    /// Charge point identity (the URL path's final segment).
    #[arg(long, default_value = "CP001")]
    id: String,

    /// Id tag used for locally initiated transactions.
    #[arg(long, default_value = "TAG1")]
    id_tag: String,

    /// Reported charge point vendor.
    #[arg(long, default_value = "VendorY")]
    vendor: String,

    /// Reported charge point model.
    #[arg(long, default_value = "ModelX")]
    model: String,

    /// Run one charge cycle of this many seconds after boot.
    #[arg(long)]
    charge_seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = ChargePointConfig {
        url: cli.url,
        charge_point_id: cli.id,
        vendor: cli.vendor,
        model: cli.model,
        id_tag: cli.id_tag.clone(),
        ..ChargePointConfig::default()
    };

    let shutdown = ShutdownCoordinator::new(10);
    let shutdown_signal = shutdown.signal();
    shutdown.start_signal_listener();

    let mut charge_point = ChargePoint::connect(config).await?;

    // Scripted charge cycle: start after boot settles, stop after the
    // requested duration
    if let Some(charge_seconds) = cli.charge_seconds {
        let sink = charge_point.command_sink();
        let state = charge_point.state().clone();
        let id_tag = cli.id_tag;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            info!("Starting scripted charge cycle ({}s)", charge_seconds);
            let _ = sink.send(ChargePointCommand::StartCharging {
                connector_id: 1,
                id_tag,
            });
            tokio::time::sleep(Duration::from_secs(charge_seconds)).await;
            match state.snapshot(1).and_then(|r| r.transaction_id) {
                Some(transaction_id) => {
                    let _ = sink.send(ChargePointCommand::StopCharging {
                        transaction_id,
                        reason: Reason::Local,
                    });
                }
                None => error!("No open transaction to stop after charge cycle"),
            }
        });
    }

    charge_point.run(shutdown_signal).await?;
    charge_point.shutdown().await;

    info!("Charge point stopped");
    Ok(())
}
