//! PLC simulator binary.
//!
//! # Usage
//!
//! ```bash
//! # Simulate every enabled device in a file
//! plcsim-server --config devices.json
//!
//! # Faster updates, verbose logs
//! plcsim-server --config devices.json --update-interval-ms 200 --log-level debug
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use plcsim_server::{
    DEFAULT_UPDATE_INTERVAL, NetworkBackends, SimulationFile, SimulationManager, SimulatorConfig,
    SystemEnv,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// PLC device simulator
#[derive(Parser, Debug)]
#[command(name = "plcsim-server")]
#[command(about = "Simulated PLC devices over Modbus TCP and OPC UA")]
#[command(version)]
struct Args {
    /// Simulation file (JSON)
    #[arg(short, long, default_value = "devices.json")]
    config: String,

    /// Update interval in milliseconds (overrides the file)
    #[arg(long)]
    update_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("PLC simulator starting");
    tracing::info!("Loading devices from {}", args.config);

    let file = SimulationFile::load(&args.config)?;
    let update_interval = args
        .update_interval_ms
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .or_else(|| file.update_interval())
        .unwrap_or(DEFAULT_UPDATE_INTERVAL);

    let manager = SimulationManager::new(
        SystemEnv::new(),
        Arc::new(NetworkBackends),
        SimulatorConfig { update_interval },
    );

    for (device, sensors) in file.enabled_devices() {
        let name = device.name.clone();
        if let Err(e) = manager.start_simulation(device, sensors).await {
            tracing::error!("Device {} not started: {}", name, e);
        }
    }

    let running = manager.running();
    if running.is_empty() {
        tracing::warn!("No device is running");
    } else {
        tracing::info!("{} device(s) running, press Ctrl-C to stop", running.len());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    let report = manager.stop_all().await;
    if !report.is_clean() {
        tracing::warn!("{} device(s) failed to stop", report.failed.len());
    }

    Ok(())
}
