//! PLC Link Framework
//!
//! Protocol-independent runtime for polling field devices and fanning
//! decoded values out to many independent consumers.
//!
//! # Overview
//!
//! This framework provides:
//! - [`LinkRegistry`] holding each consumer's address bindings and computing
//!   the de-duplicated read set for a cycle
//! - [`ProtocolAdapter`] trait implemented once per protocol variant
//! - [`PollingEngine`] driving strictly sequential poll cycles per link
//! - [`distribute`] delivering quality-tagged values to consumers
//! - [`LinkStatus`] for observing connection state
//! - [`AppConfig`] trait for configuration loading and validation
//! - [`LinkRunner`] for managing link lifecycle and graceful shutdown
//!
//! # Example
//!
//! ```ignore
//! use plclink_framework::{LinkRegistry, PollingEngine, refresh_period};
//!
//! let registry = LinkRegistry::for_adapter(&adapter);
//! let mut values = registry.register_raw("hmi", bindings, 64).unwrap();
//!
//! let engine = PollingEngine::new("plc01", adapter, registry.clone(), refresh_period(1.0));
//! let handle = engine.spawn();
//!
//! while let Some(update) = values.recv().await {
//!     // ...
//! }
//!
//! handle.stop().await;
//! ```

mod adapter;
mod config;
mod distributor;
mod engine;
mod registry;
mod runner;
mod status;

pub use adapter::{CycleError, ProtocolAdapter, RawData, RawResult};
pub use config::AppConfig;
pub use distributor::{CycleOutcome, DistributionStats, distribute};
pub use engine::{EngineHandle, PollingEngine, refresh_period};
pub use registry::{DEFAULT_DELIVERY_CAPACITY, Interest, LinkRegistry, ReadRequest, Snapshot};
pub use runner::LinkRunner;
pub use status::{ConnectionState, LinkStatus};

// Re-export commonly used types from plclink-common
pub use plclink_common::{
    AddressBinding, ConsumerId, DecodedValue, DeviceFamily, Error, ErrorKind, LinkValue,
    LoggingConfig, Quality, RawBinding, ReadKey, Result, TypedValue, ValueUpdate,
};
