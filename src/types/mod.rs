//! Core types for the telemetry link.
//!
//! ## Overview
//!
//! - [`TelemetryFrame`] is one decoded 32-byte sensor record
//! - [`SkewSample`] is the per-frame distance between device and host clocks
//! - [`PeripheralHandle`] identifies a peripheral found by a scan
//! - [`GattService`] / [`ServiceEndpoint`] describe the peripheral's service table
//!   and the resolved telemetry/command characteristic
//! - [`LinkState`] is the session lifecycle state
//! - [`UpdateRate`] controls how often a telemetry feed subscriber is woken

mod endpoint;
mod frame;
mod peripheral;
mod state;
mod update_rate;

pub use endpoint::{CharProperties, GattCharacteristic, GattService, ServiceEndpoint};
pub use frame::{SkewSample, TelemetryFrame};
pub use peripheral::PeripheralHandle;
pub use state::LinkState;
pub use update_rate::UpdateRate;
