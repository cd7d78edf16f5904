//! Modbus link service.
//!
//! Polls every configured Modbus link and logs the values delivered to each
//! configured consumer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use plclink_framework::{
    AppConfig, LinkRegistry, LinkRunner, PollingEngine, ValueUpdate, refresh_period,
};
use plclink_modbus::{ModbusAdapter, ModbusAppConfig, list_serial_ports};

/// Modbus link service (TCP/RTU/ASCII).
#[derive(Parser, Debug)]
#[command(name = "plclink-modbus")]
#[command(about = "Polls Modbus devices and delivers values to registered consumers")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "plclink.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Print the available serial ports as JSON and exit.
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_ports {
        println!("{}", serde_json::to_string(&list_serial_ports())?);
        return Ok(());
    }

    // Load configuration
    let config = ModbusAppConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let mut log_config = config.logging().clone();
    if let Some(level) = args.log_level {
        log_config.level = level;
    }
    plclink_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Loaded configuration from {:?}", args.config);

    let mut runner = LinkRunner::new("plclink-modbus");

    for link in &config.links {
        let adapter = ModbusAdapter::new(link);
        let registry = LinkRegistry::for_adapter(&adapter);

        for consumer in &link.consumers {
            match registry.register_raw(
                consumer.id.as_str(),
                consumer.bindings.iter().cloned(),
                link.delivery_capacity,
            ) {
                Some(updates) => runner.spawn(log_updates(updates)),
                None => warn!(
                    link = %link.name,
                    consumer = %consumer.id,
                    "Consumer has no usable bindings, not registered"
                ),
            }
        }

        info!(
            link = %link.name,
            connection = %link.connection,
            unit_id = link.unit_id,
            consumers = registry.consumer_count(),
            "Starting link"
        );

        let engine = PollingEngine::new(
            link.name.as_str(),
            adapter,
            registry,
            refresh_period(link.refresh_cycle_secs),
        );
        runner.add_engine(engine.spawn());
    }

    runner.run().await;

    Ok(())
}

/// Log every update delivered to one consumer as a JSON line.
async fn log_updates(mut updates: mpsc::Receiver<ValueUpdate>) {
    while let Some(update) = updates.recv().await {
        match serde_json::to_string(&update) {
            Ok(json) => info!(consumer = %update.consumer, link = %update.link, "{}", json),
            Err(e) => warn!(error = %e, "Failed to serialize value update"),
        }
    }
}
