//! Transport implementations
//!
//! - [`SimulatedTransport`] is an in-process peripheral that needs no radio
//! - [`BtleTransport`] drives a real adapter through `btleplug` (feature `btle`)

#[cfg(feature = "btle")]
mod btle;
mod simulated;

#[cfg(feature = "btle")]
pub use btle::BtleTransport;
pub use simulated::{SIMULATED_NAME, SimulatedTransport, synthetic_frame};
