//! Telemetry and command link for BLE gas-sensor peripherals.
//!
//! A mobile peripheral streams 32-byte sensor frames (CO concentration,
//! humidity, temperature, flow rate, heater voltage) as GATT notifications
//! and accepts short text commands on the same characteristic. gaslink finds
//! the peripheral, runs the connection lifecycle, decodes the frame stream
//! into a [`TelemetrySink`] and writes commands back, with inbound and
//! outbound traffic running concurrently.
//!
//! # Features
//!
//! - **Frame codec**: Big-endian 32-byte wire format, bit-exact round trips
//! - **Session lifecycle**: Scan, select, connect, resolve and stream as an
//!   observable state machine
//! - **Concurrent flows**: A blocked command prompt never delays telemetry
//! - **Transports**: `btleplug` for real radios (feature `btle`) and an
//!   in-process simulated peripheral
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gaslink::{CommandChannel, GasLink, LinkConfig, StdinCommands, TracingSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LinkConfig::default();
//!     let mut session = GasLink::simulate(config.clone(), TracingSink).await?;
//!
//!     let commands = StdinCommands::spawn(&config)?;
//!     let outcome = CommandChannel::new(commands).run(&mut session).await?;
//!     println!("Command loop ended: {outcome:?}");
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod codec;
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Link lifecycle
pub mod command;
pub mod consumer;
pub mod discovery;
pub mod session;
pub mod transport;
pub mod transports;

// Telemetry consumers
pub mod inference;
pub mod sink;
pub mod stream;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use command::{CommandChannel, CommandExit, CommandSource, StdinCommands};
pub use config::LinkConfig;
pub use consumer::{Clock, NotificationConsumer, SystemClock};
pub use session::LinkSession;
pub use sink::{FrameReport, SinkExt, TelemetryFeed, TelemetrySink, TracingSink};
pub use transport::{Transport, TransportEvent};
pub use transports::SimulatedTransport;

#[cfg(feature = "btle")]
pub use transports::BtleTransport;

/// Unified entry point for link sessions.
///
/// Each constructor builds a session over a transport and runs the full
/// connection sequence, returning a session that is already streaming.
///
/// # Examples
///
/// ## Simulated peripheral
/// ```rust,no_run
/// use gaslink::{GasLink, LinkConfig, TracingSink};
///
/// #[tokio::main]
/// async fn main() -> gaslink::Result<()> {
///     let mut session = GasLink::simulate(LinkConfig::default(), TracingSink).await?;
///     // Use session...
///     session.close().await
/// }
/// ```
pub struct GasLink;

impl GasLink {
    /// Connect to a peripheral through the host's Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No Bluetooth adapter is available
    /// - No advertised name contains the configured target name
    /// - The connection, service resolution or subscription fails
    #[cfg(feature = "btle")]
    pub async fn connect<S: TelemetrySink>(
        config: LinkConfig,
        sink: S,
    ) -> Result<LinkSession<BtleTransport>> {
        let transport = BtleTransport::new().await?;
        Self::connect_with(transport, config, sink).await
    }

    /// Connect to the in-process simulated peripheral.
    pub async fn simulate<S: TelemetrySink>(
        config: LinkConfig,
        sink: S,
    ) -> Result<LinkSession<SimulatedTransport>> {
        Self::connect_with(SimulatedTransport::new(), config, sink).await
    }

    /// Connect over any transport.
    pub async fn connect_with<T: Transport, S: TelemetrySink>(
        transport: T,
        config: LinkConfig,
        sink: S,
    ) -> Result<LinkSession<T>> {
        let mut session = LinkSession::new(transport, config, sink);
        session.connect().await?;
        Ok(session)
    }
}
