//! PLC Link Common Library
//!
//! This crate provides shared types and utilities for PLC link polling:
//!
//! - [`binding`] - Address bindings contributed by consumers (`DeviceFamily`, `AddressBinding`)
//! - [`value`] - Decoded values and per-cycle updates (`LinkValue`, `DecodedValue`, `ValueUpdate`)
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod binding;
pub mod config;
pub mod error;
pub mod value;

// Re-export commonly used types at the crate root
pub use binding::{AddressBinding, ConsumerId, DeviceFamily, RawBinding, ReadKey};
pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, ErrorKind, Result};
pub use value::{DecodedValue, LinkValue, Quality, TypedValue, ValueUpdate};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
