//! Serial port discovery.

/// Placeholder entry returned when the ports cannot be enumerated.
pub const SERIAL_LIST_ERROR: &str = "Error listing serial ports";

/// Paths of the serial devices currently present.
///
/// Never fails: an enumeration error yields a single placeholder entry.
pub fn list_serial_ports() -> Vec<String> {
    match tokio_serial::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list serial ports");
            vec![SERIAL_LIST_ERROR.to_string()]
        }
    }
}
