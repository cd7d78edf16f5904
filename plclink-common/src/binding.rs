use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Class of addressable PLC data, each read with its own function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Discrete output coils (1-bit, function 0x01).
    #[serde(alias = "Coil")]
    Coil,
    /// Discrete input contacts (1-bit, function 0x02).
    #[serde(alias = "IS")]
    DiscreteInput,
    /// Holding registers (16-bit, function 0x03).
    #[serde(alias = "HR")]
    HoldingRegister,
    /// Input registers (16-bit, function 0x04).
    #[serde(alias = "IR")]
    InputRegister,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 4] = [
        DeviceFamily::Coil,
        DeviceFamily::DiscreteInput,
        DeviceFamily::HoldingRegister,
        DeviceFamily::InputRegister,
    ];

    /// Return the string name for this family.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::Coil => "coil",
            DeviceFamily::DiscreteInput => "discrete_input",
            DeviceFamily::HoldingRegister => "holding_register",
            DeviceFamily::InputRegister => "input_register",
        }
    }

    /// Whether values of this family are single bits rather than 16-bit words.
    pub fn is_bit(&self) -> bool {
        matches!(self, DeviceFamily::Coil | DeviceFamily::DiscreteInput)
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coil" | "Coil" => Ok(DeviceFamily::Coil),
            "discrete_input" | "IS" => Ok(DeviceFamily::DiscreteInput),
            "holding_register" | "HR" => Ok(DeviceFamily::HoldingRegister),
            "input_register" | "IR" => Ok(DeviceFamily::InputRegister),
            other => Err(Error::InvalidBinding(format!(
                "unsupported device family '{}'",
                other
            ))),
        }
    }
}

/// The unit of deduplication: one read request on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReadKey {
    pub family: DeviceFamily,
    pub address: u16,
    pub quantity: u16,
}

impl fmt::Display for ReadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}x{}", self.family, self.address, self.quantity)
    }
}

/// A request to observe one address span under a human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressBinding {
    pub family: DeviceFamily,
    pub address: u16,
    pub quantity: u16,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl AddressBinding {
    /// Create a binding, rejecting an empty span.
    pub fn new(
        family: DeviceFamily,
        address: u16,
        quantity: u16,
        name: impl Into<String>,
    ) -> Result<Self, Error> {
        if quantity == 0 {
            return Err(Error::InvalidBinding(format!(
                "{} @ {}: quantity must be at least 1",
                family, address
            )));
        }

        Ok(Self {
            family,
            address,
            quantity,
            name: name.into(),
            unit: None,
        })
    }

    /// Attach a unit of measurement.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn key(&self) -> ReadKey {
        ReadKey {
            family: self.family,
            address: self.address,
            quantity: self.quantity,
        }
    }
}

/// Untyped binding as found in configuration files and registration calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBinding {
    /// Device family name (`holding_register`, or a short code such as `HR`).
    pub device: String,
    pub address: u16,
    #[serde(default = "default_quantity")]
    pub quantity: u16,
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
}

fn default_quantity() -> u16 {
    1
}

impl TryFrom<RawBinding> for AddressBinding {
    type Error = Error;

    fn try_from(raw: RawBinding) -> Result<Self, Self::Error> {
        let family = raw.device.parse()?;
        let mut binding = AddressBinding::new(family, raw.address, raw.quantity, raw.name)?;
        binding.unit = raw.unit.filter(|u| !u.is_empty());
        Ok(binding)
    }
}

/// Identity of a registered consumer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConsumerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
