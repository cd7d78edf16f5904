//! Modbus links for the PLC link framework.
//!
//! Polls Modbus devices over TCP, RTU or ASCII serial lines and hands the
//! decoded values to registered consumers.
//!
//! # Canonical values
//!
//! ```text
//! coil / discrete_input            -> "1" | "0"
//! holding_register / input_register -> "0x000A"
//! ```
//!
//! Multi-element bindings join their elements with `,`.

pub mod adapter;
pub mod ascii;
pub mod config;
pub mod ports;

pub use adapter::{COMMUNICATION_TIMEOUT, ModbusAdapter, SerialSettings, decode_raw};
pub use config::{ConnectionConfig, ConsumerConfig, ModbusAppConfig, ModbusLinkConfig};
pub use ports::{SERIAL_LIST_ERROR, list_serial_ports};
