//! In-process simulated peripheral

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::codec::{self, SERVICE_UUID, TELEMETRY_CHAR_UUID};
use crate::consumer::{Clock, SystemClock};
use crate::transport::{Transport, TransportEvent};
use crate::types::{
    CharProperties, GattCharacteristic, GattService, PeripheralHandle, ServiceEndpoint,
};
use crate::{LinkError, Result, TelemetryFrame};

/// Name the simulated peripheral advertises
pub const SIMULATED_NAME: &str = "iPhoneBLEPeripheral";

const SIMULATED_ADDRESS: &str = "5E:11:00:00:00:01";

/// Synthetic sensor readings for the `tick`th frame.
///
/// The heater alternates between its low and high phase every 20 frames and
/// the other channels drift slowly, which is enough to exercise consumers
/// without pretending to be a physical model.
pub fn synthetic_frame(tick: u64, device_ms: u64, period: Duration) -> TelemetryFrame {
    let t = tick as f32 * period.as_secs_f32();
    let phase = (t / 10.0).sin();
    TelemetryFrame {
        timestamp_ms: device_ms,
        time_s: t,
        co_ppm: (2.0 + 1.5 * phase).max(0.0),
        humidity_pct: 45.0 + 5.0 * (t / 30.0).cos(),
        temperature_c: 23.0 + 0.5 * phase,
        flow_rate: 240.0 + (tick % 7) as f32,
        heater_voltage: if (tick / 20) % 2 == 0 { 0.2 } else { 0.9 },
    }
}

#[derive(Default)]
struct SimState {
    connected: bool,
    subscribed: bool,
    events: Option<mpsc::Sender<TransportEvent>>,
    generator: Option<CancellationToken>,
    frames_sent: u64,
}

impl SimState {
    fn stop_generator(&mut self) {
        if let Some(token) = self.generator.take() {
            token.cancel();
        }
        self.subscribed = false;
    }
}

/// A peripheral living in the same process.
///
/// Advertises [`SIMULATED_NAME`] with the protocol service and a
/// read/write/notify characteristic. While subscribed it emits one frame per
/// interval; every command write is answered with a text notification
/// `Received your message: <text>`, which the host sees as a malformed
/// frame. Clones share the same peripheral.
#[derive(Clone)]
pub struct SimulatedTransport {
    interval: Duration,
    neighbours: Vec<PeripheralHandle>,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// A peripheral sending 10 frames per second.
    pub fn new() -> Self {
        Self {
            interval: Duration::from_millis(100),
            neighbours: Vec::new(),
            clock: Arc::new(SystemClock),
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Other advertisers reported ahead of the simulated peripheral.
    pub fn with_neighbours(mut self, neighbours: Vec<PeripheralHandle>) -> Self {
        self.neighbours = neighbours;
        self
    }

    /// Clock used for the device timestamps in generated frames.
    pub fn with_clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn handle() -> PeripheralHandle {
        PeripheralHandle::new(Some(SIMULATED_NAME), SIMULATED_ADDRESS)
    }

    /// Frames emitted since creation
    pub fn frames_sent(&self) -> u64 {
        self.state().frames_sent
    }

    /// Drop the link from the peripheral side.
    pub async fn drop_link(&self, reason: &str) {
        let events = {
            let mut state = self.state();
            state.stop_generator();
            state.connected = false;
            state.events.take()
        };
        if let Some(events) = events {
            let _ = events.send(TransportEvent::Disconnected { reason: Some(reason.to_string()) }).await;
        }
        info!("Simulated peripheral dropped the link: {}", reason);
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_connected(&self, operation: &str) -> Result<()> {
        if self.state().connected { Ok(()) } else { Err(LinkError::not_connected(operation)) }
    }

    fn start_generator(&self, events: mpsc::Sender<TransportEvent>) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.interval;
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut tick = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let frame = synthetic_frame(tick, clock.now_ms(), period);
                let payload = codec::encode(&frame).to_vec();
                trace!("Simulated frame {}", tick);
                let event = TransportEvent::Notification { characteristic: TELEMETRY_CHAR_UUID, payload };
                if events.send(event).await.is_err() {
                    break;
                }
                tick += 1;
                state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).frames_sent += 1;
            }
            debug!("Simulated frame generator stopped after {} frames", tick);
        });

        cancel
    }
}

#[async_trait::async_trait]
impl Transport for SimulatedTransport {
    async fn scan(&self, timeout: Duration) -> Result<Vec<PeripheralHandle>> {
        debug!("Simulated scan ({:?})", timeout);
        let mut handles = self.neighbours.clone();
        handles.push(Self::handle());
        Ok(handles)
    }

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        if peripheral.address != SIMULATED_ADDRESS {
            return Err(LinkError::connection_failed(format!(
                "{} does not accept connections",
                peripheral
            )));
        }
        self.state().connected = true;
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<GattService>> {
        self.require_connected("discover_services")?;
        Ok(vec![GattService {
            uuid: SERVICE_UUID,
            characteristics: vec![GattCharacteristic {
                uuid: TELEMETRY_CHAR_UUID,
                properties: CharProperties::new(
                    CharProperties::READ | CharProperties::WRITE | CharProperties::NOTIFY,
                ),
            }],
        }])
    }

    async fn events(&self, capacity: usize) -> Result<mpsc::Receiver<TransportEvent>> {
        self.require_connected("events")?;
        let (tx, rx) = mpsc::channel(capacity);
        self.state().events = Some(tx);
        Ok(rx)
    }

    async fn subscribe(&self, endpoint: &ServiceEndpoint) -> Result<()> {
        self.require_connected("subscribe")?;
        let mut state = self.state();
        let events = state.events.clone().ok_or_else(|| LinkError::not_connected("subscribe"))?;
        state.stop_generator();
        state.generator = Some(self.start_generator(events));
        state.subscribed = true;
        info!("Simulated peripheral streaming on {}", endpoint.characteristic);
        Ok(())
    }

    async fn unsubscribe(&self, _endpoint: &ServiceEndpoint) -> Result<()> {
        self.state().stop_generator();
        Ok(())
    }

    async fn write(
        &self,
        _endpoint: &ServiceEndpoint,
        payload: &[u8],
        _with_response: bool,
    ) -> Result<()> {
        let events = {
            let state = self.state();
            if !state.connected {
                return Err(LinkError::disconnected(Some("peripheral not connected".to_string())));
            }
            state.events.clone().filter(|_| state.subscribed)
        };

        let text = String::from_utf8_lossy(payload);
        info!("Simulated peripheral received: {}", text);
        if let Some(events) = events {
            let reply = format!("Received your message: {text}").into_bytes();
            let _ = events
                .send(TransportEvent::Notification { characteristic: TELEMETRY_CHAR_UUID, payload: reply })
                .await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state();
        state.stop_generator();
        state.connected = false;
        state.events = None;
        Ok(())
    }
}
