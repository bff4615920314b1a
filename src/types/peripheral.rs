//! Discovered peripheral identity

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a peripheral reported by a scan.
///
/// The address is the platform identifier the transport uses to reconnect:
/// a MAC address on Linux, an opaque UUID string on macOS and Windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeripheralHandle {
    /// Advertised local name, if the peripheral sent one
    pub name: Option<String>,

    /// Platform address of the peripheral
    pub address: String,
}

impl PeripheralHandle {
    /// Create a new handle
    pub fn new(name: Option<impl Into<String>>, address: impl Into<String>) -> Self {
        Self { name: name.map(Into::into), address: address.into() }
    }

    /// Whether the advertised name contains `pattern` (case-sensitive).
    ///
    /// Unnamed peripherals never match.
    pub fn name_contains(&self, pattern: &str) -> bool {
        self.name.as_deref().is_some_and(|name| name.contains(pattern))
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name.as_deref().unwrap_or("Unnamed"), self.address)
    }
}
