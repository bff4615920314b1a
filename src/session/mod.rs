//! Link session lifecycle
//!
//! A [`LinkSession`] owns one transport and walks it through the connection
//! sequence:
//!
//! ```text
//! Disconnected -> Scanning -> Connecting -> Connected -> ResolvingServices
//!     -> Streaming | Degraded -> Closing -> Disconnected
//! ```
//!
//! Once active, the notification consumer runs on its own link task while
//! the owner issues commands through [`LinkSession::send_command`]. Whichever
//! flow first sees the link drop moves the session to `Closing` and cancels
//! the other. The link task then releases the transport and only after that
//! publishes `Disconnected`.

use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{SERVICE_UUID, TELEMETRY_CHAR_UUID};
use crate::config::LinkConfig;
use crate::consumer::{Clock, NotificationConsumer, SystemClock};
use crate::discovery;
use crate::sink::TelemetrySink;
use crate::transport::{Transport, TransportEvent};
use crate::types::{LinkState, PeripheralHandle, ServiceEndpoint};
use crate::{LinkError, Result};

#[cfg(test)]
mod tests;

/// Shared handles that let either flow end the session.
#[derive(Debug, Clone)]
pub(crate) struct LinkSignals {
    state: Arc<watch::Sender<LinkState>>,
    /// Stops every flow of the link
    cancel: CancellationToken,
    /// Set when the link dropped rather than being closed by the owner
    lost: CancellationToken,
}

impl LinkSignals {
    fn new(state: Arc<watch::Sender<LinkState>>) -> Self {
        Self { state, cancel: CancellationToken::new(), lost: CancellationToken::new() }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// The link is gone: move an active session to `Closing`, mark the link
    /// lost and cancel every flow. The link task finishes the teardown. A
    /// session that is already closing is left to finish on its own.
    pub(crate) fn terminate(&self, reason: Option<String>) {
        if self.enter_closing() {
            warn!("Link lost: {}", reason.as_deref().unwrap_or("no reason given"));
            self.lost.cancel();
        }
        self.cancel.cancel();
    }

    /// Move an active session to `Closing`. Exactly one caller wins, so an
    /// orderly close and a link loss never both claim the teardown.
    fn enter_closing(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_active() {
                *state = LinkState::Closing;
                true
            } else {
                false
            }
        })
    }
}

struct ActiveLink {
    peripheral: PeripheralHandle,
    /// Subscribed endpoint; `None` in command-only mode
    telemetry: Option<ServiceEndpoint>,
    /// Writable endpoint; `None` when the characteristic rejects writes
    command: Option<ServiceEndpoint>,
    signals: LinkSignals,
    consumer: Option<JoinHandle<()>>,
}

impl ActiveLink {
    fn is_lost(&self) -> bool {
        self.signals.is_lost()
    }
}

/// A connection to one telemetry peripheral.
pub struct LinkSession<T: Transport> {
    transport: Arc<T>,
    config: LinkConfig,
    sink: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    state: Arc<watch::Sender<LinkState>>,
    active: Option<ActiveLink>,
}

impl<T: Transport> LinkSession<T> {
    /// Create a disconnected session.
    pub fn new<S: TelemetrySink>(transport: T, config: LinkConfig, sink: S) -> Self {
        Self::with_clock(transport, config, sink, SystemClock)
    }

    /// Create a session that takes arrival times from `clock`.
    pub fn with_clock<S: TelemetrySink, C: Clock>(
        transport: T,
        config: LinkConfig,
        sink: S,
        clock: C,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            transport: Arc::new(transport),
            config,
            sink: Arc::new(sink),
            clock: Arc::new(clock),
            state: Arc::new(state),
            active: None,
        }
    }

    /// Run the full connection sequence.
    ///
    /// On success the session is `Streaming` (or `Degraded` when command-only
    /// mode is allowed and the characteristic cannot notify). On failure it
    /// is back in `Disconnected` and the transport holds no link. A session
    /// that is already connected releases its old link first.
    pub async fn connect(&mut self) -> Result<()> {
        if self.active.is_some() {
            debug!("Releasing previous link before reconnecting");
            self.release(true).await?;
        }

        self.set_state(LinkState::Scanning);
        let peripheral = match self.find_target().await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                self.set_state(LinkState::Disconnected);
                return Err(e);
            }
        };

        self.set_state(LinkState::Connecting);
        info!("Connecting to {}", peripheral);
        if let Err(e) = self.open_link(&peripheral).await {
            self.abort_link().await;
            return Err(e);
        }
        self.set_state(LinkState::Connected);
        info!("Connected to {}", peripheral);

        if let Err(e) = self.start_flows(peripheral).await {
            self.abort_link().await;
            return Err(e);
        }
        Ok(())
    }

    async fn find_target(&self) -> Result<PeripheralHandle> {
        let handles = discovery::discover(&*self.transport, self.config.scan_timeout).await?;
        let target = discovery::select_target(&handles, &self.config.target_name)?;
        info!("Selected {}", target);
        Ok(target)
    }

    async fn open_link(&self, peripheral: &PeripheralHandle) -> Result<()> {
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.transport.connect(peripheral)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::connection_failed(format!("no response within {timeout:?}"))),
        }
    }

    async fn start_flows(&mut self, peripheral: PeripheralHandle) -> Result<()> {
        self.set_state(LinkState::ResolvingServices);

        let duration = self.config.discovery_timeout;
        let services = tokio::time::timeout(duration, self.transport.discover_services())
            .await
            .map_err(|_| LinkError::Timeout { duration })??;
        debug!("Peripheral exposes {} service(s)", services.len());

        let endpoint = ServiceEndpoint::resolve(&services, SERVICE_UUID, TELEMETRY_CHAR_UUID)
            .ok_or(LinkError::EndpointNotFound {
                service: SERVICE_UUID,
                characteristic: TELEMETRY_CHAR_UUID,
            })?;

        let properties = endpoint.properties;
        let mode = if properties.can_stream() {
            LinkState::Streaming
        } else if self.config.allow_command_only && properties.can_write() {
            warn!(
                "Characteristic {} cannot notify; continuing in command-only mode",
                endpoint.characteristic
            );
            LinkState::Degraded
        } else {
            self.set_state(LinkState::Closing);
            return Err(LinkError::UnsupportedCharacteristic {
                characteristic: endpoint.characteristic,
            });
        };

        // Open the event channel before subscribing so the first
        // notification cannot be lost.
        let events = self.transport.events(self.config.event_capacity).await?;
        let telemetry = if mode == LinkState::Streaming {
            self.transport.subscribe(&endpoint).await?;
            Some(endpoint)
        } else {
            None
        };

        let signals = LinkSignals::new(Arc::clone(&self.state));
        self.set_state(mode);

        let consumer = NotificationConsumer::new(
            Arc::clone(&self.sink),
            Arc::clone(&self.clock),
            endpoint.characteristic,
        );
        let consumer = self.spawn_link_task(consumer, events, signals.clone(), peripheral.clone());

        info!("Link to {} is {}", peripheral, mode);
        self.active = Some(ActiveLink {
            peripheral,
            telemetry,
            command: properties.can_write().then_some(endpoint),
            signals,
            consumer: Some(consumer),
        });
        Ok(())
    }

    /// Run the consumer for one link. When the link drops, this task releases
    /// the transport after the consumer has stopped and then publishes
    /// `Disconnected`.
    fn spawn_link_task(
        &self,
        consumer: NotificationConsumer,
        events: mpsc::Receiver<TransportEvent>,
        signals: LinkSignals,
        peripheral: PeripheralHandle,
    ) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            consumer.run(events, &signals).await;
            if !signals.is_lost() {
                return;
            }

            if let Err(e) = transport.disconnect().await {
                warn!("Failed to release lost link to {}: {}", peripheral, e);
            }
            let previous = signals.state.send_replace(LinkState::Disconnected);
            debug!("Link state: {} -> {}", previous, LinkState::Disconnected);
            info!("Link to {} released after link loss", peripheral);
        })
    }

    /// Establishment failed after the radio may hold a link.
    async fn abort_link(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!("Failed to release link after aborted connect: {}", e);
        }
        self.set_state(LinkState::Disconnected);
    }

    /// Write one command to the peripheral.
    ///
    /// With `write_with_response` configured the call returns once the
    /// peripheral acknowledged the write. A write that fails because the
    /// link dropped terminates the session; the error is returned once the
    /// link has been released.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let link = self.active.as_ref().ok_or_else(|| LinkError::not_connected("send_command"))?;
        if link.is_lost() {
            return Err(LinkError::disconnected(None));
        }
        let endpoint = link
            .command
            .ok_or_else(|| LinkError::command_write("characteristic does not accept writes"))?;

        debug!("Sending command ({} bytes)", command.len());
        let result =
            self.transport.write(&endpoint, command.as_bytes(), self.config.write_with_response).await;

        if let Err(e) = &result {
            if e.is_disconnect() {
                link.signals.terminate(Some(e.to_string()));
                self.wait_for_release().await;
            }
        }
        result
    }

    async fn wait_for_release(&self) {
        let mut updates = self.state.subscribe();
        let _ = updates.wait_for(|state| *state == LinkState::Disconnected).await;
    }

    /// Shut the session down.
    ///
    /// An orderly close unsubscribes before disconnecting. After the link was
    /// lost the link task has already released the transport and this only
    /// reaps it. Either way the consumer has stopped and the session is
    /// `Disconnected` when this returns. Closing a session that never
    /// connected is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        self.shut_down(true).await
    }

    /// Shut the session down without unsubscribing first.
    ///
    /// Used when the host side goes away (end of input) and only the radio
    /// link needs releasing.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.shut_down(false).await
    }

    async fn shut_down(&mut self, unsubscribe: bool) -> Result<()> {
        if self.active.is_none() {
            self.set_state(LinkState::Disconnected);
            return Ok(());
        }
        self.release(unsubscribe).await
    }

    async fn release(&mut self, unsubscribe: bool) -> Result<()> {
        let Some(mut link) = self.active.take() else {
            return Ok(());
        };

        if link.signals.enter_closing() {
            debug!("Closing link to {}", link.peripheral);
        }
        link.signals.cancel.cancel();
        let task_finished = match link.consumer.take() {
            Some(consumer) => match consumer.await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Link task failed: {}", e);
                    false
                }
            },
            None => false,
        };

        let lost = link.is_lost();
        if lost && task_finished {
            self.set_state(LinkState::Disconnected);
            debug!("Link to {} was already released", link.peripheral);
            return Ok(());
        }

        if unsubscribe && !lost {
            if let Some(endpoint) = &link.telemetry {
                if let Err(e) = self.transport.unsubscribe(endpoint).await {
                    warn!("Failed to unsubscribe from {}: {}", endpoint.characteristic, e);
                }
            }
        }

        let result = self.transport.disconnect().await;
        if let Err(e) = &result {
            warn!("Failed to disconnect from {}: {}", link.peripheral, e);
        }
        self.set_state(LinkState::Disconnected);
        info!("Link to {} closed", link.peripheral);

        // A dropped peripheral may refuse the disconnect; the link is gone
        // either way.
        if lost { Ok(()) } else { result }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Stream of state changes
    ///
    /// Yields the current state immediately, then each change. A slow reader
    /// skips intermediate states and sees the latest one.
    pub fn state_updates(&self) -> impl Stream<Item = LinkState> + 'static {
        WatchStream::new(self.state.subscribe())
    }

    /// The current link, unless it has dropped
    fn live(&self) -> Option<&ActiveLink> {
        self.active.as_ref().filter(|link| !link.is_lost())
    }

    /// The connected peripheral, if any
    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.live().map(|link| &link.peripheral)
    }

    /// Endpoint delivering telemetry notifications
    pub fn telemetry_endpoint(&self) -> Option<ServiceEndpoint> {
        self.live().and_then(|link| link.telemetry)
    }

    /// Endpoint accepting command writes
    pub fn command_endpoint(&self) -> Option<ServiceEndpoint> {
        self.live().and_then(|link| link.command)
    }

    pub fn is_degraded(&self) -> bool {
        self.state() == LinkState::Degraded
    }

    /// Token cancelled when the current link ends, from either flow.
    pub fn link_token(&self) -> Option<CancellationToken> {
        self.live().map(|link| link.signals.token())
    }

    pub fn sink(&self) -> &Arc<dyn TelemetrySink> {
        &self.sink
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        self.transport.as_ref()
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Link state: {} -> {}", previous, state);
        }
    }
}

impl<T: Transport> Drop for LinkSession<T> {
    fn drop(&mut self) {
        if let Some(link) = &self.active {
            link.signals.cancel.cancel();
        }
    }
}
