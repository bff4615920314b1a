//! Link session lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`LinkSession`](crate::LinkSession).
///
/// ```text
/// Disconnected -> Scanning -> Connecting -> Connected -> ResolvingServices
///     -> Streaming | Degraded -> Closing -> Disconnected
/// ```
///
/// Any establishment failure returns to `Disconnected`. A transport
/// disconnect from `Streaming` or `Degraded` passes through `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    ResolvingServices,
    /// Subscribed to telemetry; commands and notifications flow concurrently
    Streaming,
    /// Telemetry unavailable, command writes still permitted
    Degraded,
    Closing,
}

impl LinkState {
    /// Whether the peripheral link is up and usable for I/O.
    pub fn is_active(self) -> bool {
        matches!(self, LinkState::Streaming | LinkState::Degraded)
    }

    /// Whether the session is somewhere between a connect request and
    /// the steady state.
    pub fn is_establishing(self) -> bool {
        matches!(
            self,
            LinkState::Scanning
                | LinkState::Connecting
                | LinkState::Connected
                | LinkState::ResolvingServices
        )
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Scanning => "scanning",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::ResolvingServices => "resolving-services",
            LinkState::Streaming => "streaming",
            LinkState::Degraded => "degraded",
            LinkState::Closing => "closing",
        };
        f.write_str(name)
    }
}
