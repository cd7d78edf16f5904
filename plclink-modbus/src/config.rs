//! Configuration for Modbus links.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use plclink_framework::{
    AppConfig, DEFAULT_DELIVERY_CAPACITY, Error, LoggingConfig, RawBinding, Result,
};

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusAppConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Links to poll, one connection each
    pub links: Vec<ModbusLinkConfig>,
}

/// Configuration for a single Modbus link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusLinkConfig {
    /// Link name (used in logs and value updates)
    pub name: String,

    /// Transport and address
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Refresh period in seconds; zero or negative disables polling
    #[serde(default = "default_refresh_cycle")]
    pub refresh_cycle_secs: f64,

    /// Per-consumer delivery queue depth
    #[serde(default = "default_delivery_capacity")]
    pub delivery_capacity: usize,

    /// Consumers registered at startup
    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
}

fn default_unit_id() -> u8 {
    1
}

fn default_refresh_cycle() -> f64 {
    1.0
}

fn default_delivery_capacity() -> usize {
    DEFAULT_DELIVERY_CAPACITY
}

/// Connection configuration (TCP, RTU or ASCII).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
    },
    /// Modbus ASCII (serial) connection, always 7 data bits
    Ascii {
        /// Serial port path
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

impl ConnectionConfig {
    /// Short transport name.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionConfig::Tcp { .. } => "tcp",
            ConnectionConfig::Rtu { .. } => "rtu",
            ConnectionConfig::Ascii { .. } => "ascii",
        }
    }

    pub fn is_serial(&self) -> bool {
        !matches!(self, ConnectionConfig::Tcp { .. })
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionConfig::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            ConnectionConfig::Rtu {
                port, baud_rate, ..
            }
            | ConnectionConfig::Ascii {
                port, baud_rate, ..
            } => write!(f, "{}://{}@{}", self.kind(), port, baud_rate),
        }
    }
}

/// A consumer and the addresses it wants delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer identifier, unique within the link
    pub id: String,

    /// Address bindings in their untyped form
    #[serde(default)]
    pub bindings: Vec<RawBinding>,
}

impl AppConfig for ModbusAppConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        if self.links.is_empty() {
            return Err(Error::validation("At least one link must be configured"));
        }

        let mut names = HashSet::new();
        for link in &self.links {
            if link.name.is_empty() {
                return Err(Error::validation("Link name cannot be empty"));
            }

            if !names.insert(link.name.as_str()) {
                return Err(Error::validation(format!(
                    "Duplicate link name '{}'",
                    link.name
                )));
            }

            link.validate()?;
        }

        Ok(())
    }
}

impl ModbusLinkConfig {
    fn validate(&self) -> Result<()> {
        if self.connection.is_serial() && !(1..=247).contains(&self.unit_id) {
            return Err(Error::validation(format!(
                "Link '{}': unit_id must be 1-247",
                self.name
            )));
        }

        match &self.connection {
            ConnectionConfig::Tcp { host, .. } => {
                if host.is_empty() {
                    return Err(Error::validation(format!(
                        "Link '{}': host cannot be empty",
                        self.name
                    )));
                }
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                parity,
                ..
            }
            | ConnectionConfig::Ascii {
                port,
                baud_rate,
                parity,
            } => {
                if port.is_empty() {
                    return Err(Error::validation(format!(
                        "Link '{}': serial port cannot be empty",
                        self.name
                    )));
                }
                if *baud_rate == 0 {
                    return Err(Error::validation(format!(
                        "Link '{}': baud_rate must be positive",
                        self.name
                    )));
                }
                match parity.to_lowercase().as_str() {
                    "none" | "even" | "odd" => {}
                    _ => {
                        return Err(Error::validation(format!(
                            "Link '{}': invalid parity '{}' (use none, even, or odd)",
                            self.name, parity
                        )));
                    }
                }
            }
        }

        if let ConnectionConfig::Rtu { data_bits, .. } = &self.connection {
            if !(5..=8).contains(data_bits) {
                return Err(Error::validation(format!(
                    "Link '{}': data_bits must be 5-8",
                    self.name
                )));
            }
        }

        for consumer in &self.consumers {
            if consumer.id.is_empty() {
                return Err(Error::validation(format!(
                    "Link '{}': consumer id cannot be empty",
                    self.name
                )));
            }
            if let Some(binding) = consumer.bindings.iter().find(|b| b.quantity == 0) {
                return Err(Error::validation(format!(
                    "Link '{}': binding '{}' of consumer '{}' has zero quantity",
                    self.name, binding.name, consumer.id
                )));
            }
        }

        Ok(())
    }
}
