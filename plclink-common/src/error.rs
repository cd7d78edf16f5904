use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common error type for PLC link components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A binding referenced a device family or shape the link cannot read.
    #[error("Invalid binding: {0}")]
    InvalidBinding(String),

    /// Transport-level failure to open or keep the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Read timed out after {timeout_ms} ms")]
    ReadTimeout { timeout_ms: u64 },

    /// Malformed or unexpected response for a single request.
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], used for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidBinding,
    Connection,
    ReadTimeout,
    ProtocolDecode,
    Other,
}

impl Error {
    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::ProtocolDecode(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidBinding(_) => ErrorKind::InvalidBinding,
            Error::Connection(_) | Error::Io(_) => ErrorKind::Connection,
            Error::ReadTimeout { .. } => ErrorKind::ReadTimeout,
            Error::ProtocolDecode(_) => ErrorKind::ProtocolDecode,
            _ => ErrorKind::Other,
        }
    }
}

impl From<json5::Error> for Error {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

/// Result type alias using the link Error.
pub type Result<T> = std::result::Result<T, Error>;
