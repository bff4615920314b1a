//! Transport trait for the radio stack

use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::Result;
use crate::types::{GattService, PeripheralHandle, ServiceEndpoint};

/// Event pushed by the transport without a host-initiated read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A notification or indication payload from a subscribed characteristic
    Notification { characteristic: Uuid, payload: Vec<u8> },

    /// The link to the connected peripheral went down
    Disconnected { reason: Option<String> },
}

/// Trait for BLE central backends
///
/// Transports abstract over the radio stack (a real adapter, a simulated
/// peripheral, a scripted test double). A transport serves at most one
/// connected peripheral at a time. All methods take `&self` so that the
/// inbound and outbound flows of a session can use the transport at the same
/// time; implementations serialise internally where the stack requires it.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Scan for `timeout` and return every peripheral seen, in the order the
    /// radio reported them.
    async fn scan(&self, timeout: Duration) -> Result<Vec<PeripheralHandle>>;

    /// Establish a link to `peripheral`.
    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()>;

    /// Enumerate the connected peripheral's services and characteristics.
    async fn discover_services(&self) -> Result<Vec<GattService>>;

    /// Open the event channel for the connected peripheral.
    ///
    /// The returned receiver is the single consumer of a single-producer
    /// channel: notifications arrive in transport order, and a
    /// [`TransportEvent::Disconnected`] (or the channel closing) means the
    /// link is gone. Call before [`subscribe`](Transport::subscribe) so no
    /// early notification is lost.
    async fn events(&self, capacity: usize) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Enable notifications/indications on `endpoint`.
    async fn subscribe(&self, endpoint: &ServiceEndpoint) -> Result<()>;

    /// Disable notifications/indications on `endpoint`.
    async fn unsubscribe(&self, endpoint: &ServiceEndpoint) -> Result<()>;

    /// Write `payload` to `endpoint`.
    ///
    /// With `with_response` the call returns only after the peripheral
    /// acknowledged the write.
    async fn write(
        &self,
        endpoint: &ServiceEndpoint,
        payload: &[u8],
        with_response: bool,
    ) -> Result<()>;

    /// Tear down the link. Disconnecting an idle transport is not an error.
    async fn disconnect(&self) -> Result<()>;
}
