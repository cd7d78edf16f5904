//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use plclink_common::{LoggingConfig, Result, load_config};

/// Trait for application configuration types.
///
/// Implement this trait for a protocol's configuration struct to get
/// loading, validation, and access to the logging settings.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use plclink_framework::{AppConfig, LoggingConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyConfig {
///     pub logging: LoggingConfig,
///     pub links: Vec<MyLinkConfig>,
/// }
///
/// impl AppConfig for MyConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> Result<()> {
///         if self.links.is_empty() {
///             return Err(Error::validation("At least one link required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait AppConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a JSON5 file and validate it.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_config(path)?;
        config.validate()?;
        Ok(config)
    }
}
