use serde::{Deserialize, Serialize};
use std::fmt;

use crate::binding::ConsumerId;

/// Native value decoded from a protocol response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    /// A single bit.
    Bool(bool),
    /// A single 16-bit register.
    Register(u16),
    /// Several consecutive bits.
    Bits(Vec<bool>),
    /// Several consecutive 16-bit registers.
    Registers(Vec<u16>),
}

/// A decoded value in both its canonical link string and native form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkValue {
    /// Canonical link-level representation (e.g. `"1"`, `"0x000A"`).
    pub text: String,
    /// The native typed value.
    pub typed: TypedValue,
}

impl LinkValue {
    pub fn new(text: impl Into<String>, typed: TypedValue) -> Self {
        Self {
            text: text.into(),
            typed,
        }
    }
}

impl fmt::Display for LinkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Quality tag accompanying every delivered value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Good,
    Bad,
}

/// One named value delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedValue {
    pub name: String,
    /// `None` whenever `quality` is [`Quality::Bad`].
    pub value: Option<LinkValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub quality: Quality,
}

impl DecodedValue {
    pub fn good(name: impl Into<String>, value: LinkValue, unit: Option<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            unit,
            quality: Quality::Good,
        }
    }

    pub fn bad(name: impl Into<String>, unit: Option<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            unit,
            quality: Quality::Bad,
        }
    }

    pub fn is_good(&self) -> bool {
        self.quality == Quality::Good
    }
}

/// Event pushed to a consumer after each poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueUpdate {
    /// Recipient of this update.
    pub consumer: ConsumerId,
    /// Name of the link (connection) that produced the values.
    pub link: String,
    /// Cycle sequence number, starting at 1.
    pub cycle: u64,
    /// Unix epoch milliseconds when the cycle finished.
    pub timestamp: i64,
    pub values: Vec<DecodedValue>,
    /// Set when the whole cycle failed (connection error or timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValueUpdate {
    /// Look up a value by its display name.
    pub fn get(&self, name: &str) -> Option<&DecodedValue> {
        self.values.iter().find(|v| v.name == name)
    }
}
