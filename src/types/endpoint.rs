//! GATT service table and resolved endpoints

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capability flags declared by a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharProperties(pub u8);

impl CharProperties {
    pub const READ: u8 = 1 << 0;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 1 << 1;
    pub const WRITE: u8 = 1 << 2;
    pub const NOTIFY: u8 = 1 << 3;
    pub const INDICATE: u8 = 1 << 4;

    /// Create from a raw flag mask.
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// Check if a specific flag is set using a bitmask.
    pub fn has_flag(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Notifications or indications can deliver telemetry.
    pub fn can_stream(&self) -> bool {
        self.has_flag(Self::NOTIFY | Self::INDICATE)
    }

    /// Commands can be written, with or without acknowledgement.
    pub fn can_write(&self) -> bool {
        self.has_flag(Self::WRITE | Self::WRITE_WITHOUT_RESPONSE)
    }

    /// Get the raw flag mask.
    pub fn value(&self) -> u8 {
        self.0
    }
}

/// One characteristic entry of a discovered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub properties: CharProperties,
}

/// A service as reported by the transport after service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// A resolved (service, characteristic) pair with its capabilities.
///
/// Endpoints are re-resolved on every connection and never outlive the
/// session that resolved them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub properties: CharProperties,
}

impl ServiceEndpoint {
    /// Locate `characteristic` inside `service` within a discovered service table.
    pub fn resolve(services: &[GattService], service: Uuid, characteristic: Uuid) -> Option<Self> {
        services.iter().filter(|svc| svc.uuid == service).find_map(|svc| {
            svc.characteristics.iter().find(|c| c.uuid == characteristic).map(|c| Self {
                service,
                characteristic,
                properties: c.properties,
            })
        })
    }
}
