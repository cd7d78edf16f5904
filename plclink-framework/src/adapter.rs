//! Protocol adapter capability set.
//!
//! One adapter instance owns the connection to exactly one physical device.
//! The polling engine drives it strictly sequentially, so implementations
//! never see overlapping calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use plclink_common::{DeviceFamily, Error, ErrorKind, LinkValue, ReadKey, Result};

use crate::registry::ReadRequest;

/// Undecoded response for one read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    pub key: ReadKey,
    pub data: RawData,
}

/// Response payload as returned by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawData {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
    /// The device answered with a protocol-level exception.
    Exception(String),
    /// The response arrived intact but did not match the request.
    Malformed(String),
}

/// A whole-cycle failure, as reported to consumers and the status interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CycleError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Capabilities every protocol variant must provide.
#[async_trait]
pub trait ProtocolAdapter: Send {
    /// Short protocol name for logs (e.g. "modbus-tcp").
    fn name(&self) -> &str;

    /// Whether this protocol can read the given family.
    fn supports(&self, family: DeviceFamily) -> bool;

    /// Whether a connection is currently established.
    fn is_open(&self) -> bool;

    /// Open the connection described by the adapter's configuration.
    async fn connect(&mut self) -> Result<()>;

    /// Execute one read per request, in order, on the open connection.
    ///
    /// A transport failure or timeout abandons the whole batch with `Err`.
    /// Per-request protocol exceptions are returned as [`RawData::Exception`]
    /// and undecodable responses as [`RawData::Malformed`].
    async fn read_batch(&mut self, batch: &[ReadRequest]) -> Result<Vec<RawResult>>;

    /// Decode one raw result into its link representation.
    fn decode(&self, raw: &RawResult) -> Result<LinkValue>;

    /// Map a failure from `connect` or `read_batch` to the error reported
    /// for the whole cycle.
    fn classify_connection_error(&self, err: &Error) -> CycleError {
        match err.kind() {
            ErrorKind::Connection | ErrorKind::ReadTimeout => CycleError::new(
                ErrorKind::Connection,
                format!("{} com error: {}", self.name(), err),
            ),
            kind => CycleError::new(kind, err.to_string()),
        }
    }

    /// Tear the connection down. Closing a closed adapter is a no-op.
    async fn close(&mut self) -> Result<()>;
}
