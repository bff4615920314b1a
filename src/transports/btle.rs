//! Bluetooth LE transport backed by `btleplug`

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{Transport, TransportEvent};
use crate::types::{
    CharProperties, GattCharacteristic, GattService, PeripheralHandle, ServiceEndpoint,
};
use crate::{LinkError, Result};

#[derive(Default)]
struct BtleState {
    /// Peripherals from the most recent scan, in adapter order
    seen: Vec<Peripheral>,
    connected: Option<Peripheral>,
    forwarder: Option<CancellationToken>,
}

/// Transport using the first Bluetooth adapter of the host.
pub struct BtleTransport {
    adapter: Adapter,
    state: Mutex<BtleState>,
}

impl BtleTransport {
    /// Open the host's first Bluetooth adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await.map_err(|e| LinkError::transport("open manager", e))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| LinkError::transport("list adapters", e))?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::Transport {
                operation: "open adapter: no Bluetooth adapter found".to_string(),
                source: None,
            })?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        Ok(Self { adapter, state: Mutex::new(BtleState::default()) })
    }

    fn state(&self) -> MutexGuard<'_, BtleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn connected(&self, operation: &str) -> Result<Peripheral> {
        self.state().connected.clone().ok_or_else(|| LinkError::not_connected(operation))
    }

    fn characteristic(peripheral: &Peripheral, endpoint: &ServiceEndpoint) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == endpoint.characteristic && c.service_uuid == endpoint.service)
            .ok_or(LinkError::EndpointNotFound {
                service: endpoint.service,
                characteristic: endpoint.characteristic,
            })
    }

    fn stop_forwarder(&self) {
        if let Some(token) = self.state().forwarder.take() {
            token.cancel();
        }
    }
}

fn char_properties(flags: CharPropFlags) -> CharProperties {
    let mapping = [
        (CharPropFlags::READ, CharProperties::READ),
        (CharPropFlags::WRITE_WITHOUT_RESPONSE, CharProperties::WRITE_WITHOUT_RESPONSE),
        (CharPropFlags::WRITE, CharProperties::WRITE),
        (CharPropFlags::NOTIFY, CharProperties::NOTIFY),
        (CharPropFlags::INDICATE, CharProperties::INDICATE),
    ];
    let bits = mapping
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .fold(0u8, |bits, (_, ours)| bits | ours);
    CharProperties::new(bits)
}

#[async_trait::async_trait]
impl Transport for BtleTransport {
    async fn scan(&self, timeout: Duration) -> Result<Vec<PeripheralHandle>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| LinkError::transport("start scan", e))?;
        tokio::time::sleep(timeout).await;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let peripherals =
            self.adapter.peripherals().await.map_err(|e| LinkError::transport("list peripherals", e))?;

        let mut handles = Vec::with_capacity(peripherals.len());
        for peripheral in &peripherals {
            let name = match peripheral.properties().await {
                Ok(props) => props.and_then(|p| p.local_name),
                Err(e) => {
                    debug!("No properties for {}: {}", peripheral.id(), e);
                    None
                }
            };
            handles.push(PeripheralHandle::new(name, peripheral.id().to_string()));
        }

        self.state().seen = peripherals;
        Ok(handles)
    }

    async fn connect(&self, handle: &PeripheralHandle) -> Result<()> {
        let peripheral = self
            .state()
            .seen
            .iter()
            .find(|p| p.id().to_string() == handle.address)
            .cloned()
            .ok_or_else(|| {
                LinkError::connection_failed(format!("{} was not seen in the last scan", handle))
            })?;

        peripheral.connect().await.map_err(|e| {
            LinkError::connection_failed_with_source(format!("connect to {}", handle), Box::new(e))
        })?;
        self.state().connected = Some(peripheral);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<GattService>> {
        let peripheral = self.connected("discover_services")?;
        peripheral.discover_services().await.map_err(|e| LinkError::transport("discover services", e))?;

        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| GattService {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| GattCharacteristic { uuid: c.uuid, properties: char_properties(c.properties) })
                    .collect(),
            })
            .collect())
    }

    async fn events(&self, capacity: usize) -> Result<mpsc::Receiver<TransportEvent>> {
        let peripheral = self.connected("events")?;
        let mut notifications =
            peripheral.notifications().await.map_err(|e| LinkError::transport("open notifications", e))?;
        let mut central =
            self.adapter.events().await.map_err(|e| LinkError::transport("open adapter events", e))?;

        self.stop_forwarder();
        let cancel = CancellationToken::new();
        self.state().forwarder = Some(cancel.clone());

        let (tx, rx) = mpsc::channel(capacity);
        let peripheral_id = peripheral.id();

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    event = central.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                            break "device disconnected".to_string();
                        }
                        Some(_) => {}
                        None => break "adapter event stream ended".to_string(),
                    },
                    notification = notifications.next() => match notification {
                        Some(n) => {
                            let event = TransportEvent::Notification { characteristic: n.uuid, payload: n.value };
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        None => break "notification stream ended".to_string(),
                    },
                }
            };
            debug!("Event forwarder stopping: {}", reason);
            let _ = tx.send(TransportEvent::Disconnected { reason: Some(reason) }).await;
        });

        Ok(rx)
    }

    async fn subscribe(&self, endpoint: &ServiceEndpoint) -> Result<()> {
        let peripheral = self.connected("subscribe")?;
        let characteristic = Self::characteristic(&peripheral, endpoint)?;
        peripheral.subscribe(&characteristic).await.map_err(|e| LinkError::transport("subscribe", e))
    }

    async fn unsubscribe(&self, endpoint: &ServiceEndpoint) -> Result<()> {
        let peripheral = self.connected("unsubscribe")?;
        let characteristic = Self::characteristic(&peripheral, endpoint)?;
        peripheral.unsubscribe(&characteristic).await.map_err(|e| LinkError::transport("unsubscribe", e))
    }

    async fn write(
        &self,
        endpoint: &ServiceEndpoint,
        payload: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let peripheral = self.connected("write")?;
        let characteristic = Self::characteristic(&peripheral, endpoint)?;
        let write_type = if with_response { WriteType::WithResponse } else { WriteType::WithoutResponse };

        match peripheral.write(&characteristic, payload, write_type).await {
            Ok(()) => Ok(()),
            Err(e) if !peripheral.is_connected().await.unwrap_or(false) => {
                Err(LinkError::disconnected(Some(e.to_string())))
            }
            Err(e) => Err(LinkError::CommandWrite { reason: e.to_string(), source: Some(Box::new(e)) }),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_forwarder();
        let Some(peripheral) = self.state().connected.take() else {
            return Ok(());
        };
        peripheral.disconnect().await.map_err(|e| LinkError::transport("disconnect", e))
    }
}
