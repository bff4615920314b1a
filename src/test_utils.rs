//! Test doubles for the link layer
//!
//! [`MockTransport`] is a scripted transport: tests decide what a scan finds,
//! whether connecting works, which services exist and how writes behave, and
//! inject notifications or disconnects into the event channel. Clones share
//! state, so a test keeps one clone for inspection after handing another to a
//! session.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::codec::{SERVICE_UUID, TELEMETRY_CHAR_UUID};
use crate::consumer::Clock;
use crate::sink::TelemetrySink;
use crate::transport::{Transport, TransportEvent};
use crate::types::{CharProperties, GattCharacteristic, GattService, PeripheralHandle, ServiceEndpoint};
use crate::{LinkError, Result, TelemetryFrame};

/// A frame with plausible readings and the given device timestamp.
pub fn sample_frame(timestamp_ms: u64) -> TelemetryFrame {
    TelemetryFrame {
        timestamp_ms,
        time_s: 1.5,
        co_ppm: 12.34,
        humidity_pct: 45.0,
        temperature_c: 23.0,
        flow_rate: 250.0,
        heater_voltage: 0.9,
    }
}

/// Clock that always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

/// One callback observed by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkRecord {
    Frame { timestamp_ms: u64, skew_ms: u64 },
    DecodeError { length: usize },
    CommandError(String),
}

/// Sink that remembers every callback in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<SinkRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<SinkRecord> {
        lock(&self.records).clone()
    }

    pub fn frame_timestamps(&self) -> Vec<u64> {
        lock(&self.records)
            .iter()
            .filter_map(|r| match r {
                SinkRecord::Frame { timestamp_ms, .. } => Some(*timestamp_ms),
                _ => None,
            })
            .collect()
    }

    /// Poll until at least `count` records arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<SinkRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = self.records();
            if records.len() >= count || tokio::time::Instant::now() >= deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn push(&self, record: SinkRecord) {
        lock(&self.records).push(record);
    }
}

impl TelemetrySink for RecordingSink {
    fn report_frame(&self, frame: TelemetryFrame, skew_ms: u64) {
        self.push(SinkRecord::Frame { timestamp_ms: frame.timestamp_ms, skew_ms });
    }

    fn report_decode_error(&self, length_observed: usize) {
        self.push(SinkRecord::DecodeError { length: length_observed });
    }

    fn report_command_error(&self, detail: &str) {
        self.push(SinkRecord::CommandError(detail.to_string()));
    }
}

/// A transport call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Scan,
    Connect(String),
    DiscoverServices,
    Events,
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Write { payload: Vec<u8>, with_response: bool },
    Disconnect,
}

#[derive(Debug, Clone)]
enum WriteBehavior {
    Accept,
    Reject(String),
    DropLink,
}

#[derive(Debug)]
struct MockState {
    scan: Vec<PeripheralHandle>,
    connect_error: Option<String>,
    connect_hangs: bool,
    disconnect_error: Option<String>,
    services: Vec<GattService>,
    writes: WriteBehavior,
    events: Option<mpsc::Sender<TransportEvent>>,
    calls: Vec<MockCall>,
    scan_timeouts: Vec<Duration>,
}

/// Scripted [`Transport`] for tests.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport whose scan finds nothing and whose peripheral exposes
    /// the protocol service with a read/write/notify characteristic.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                scan: Vec::new(),
                connect_error: None,
                connect_hangs: false,
                disconnect_error: None,
                services: protocol_services(
                    CharProperties::READ | CharProperties::WRITE | CharProperties::NOTIFY,
                ),
                writes: WriteBehavior::Accept,
                events: None,
                calls: Vec::new(),
                scan_timeouts: Vec::new(),
            })),
        }
    }

    /// A transport that finds an unrelated phone followed by the peripheral.
    pub fn with_peripheral() -> Self {
        Self::new().with_scan(vec![
            PeripheralHandle::new(Some("Pixel 7"), "00:00:00:00:00:01"),
            PeripheralHandle::new(Some("iPhoneBLEPeripheral"), "00:00:00:00:00:02"),
        ])
    }

    pub fn with_scan(self, handles: Vec<PeripheralHandle>) -> Self {
        self.state().scan = handles;
        self
    }

    pub fn with_services(self, services: Vec<GattService>) -> Self {
        self.state().services = services;
        self
    }

    /// Replace the protocol characteristic's capability flags.
    pub fn with_char_properties(self, flags: u8) -> Self {
        self.with_services(protocol_services(flags))
    }

    pub fn failing_connect(self, reason: &str) -> Self {
        self.state().connect_error = Some(reason.to_string());
        self
    }

    pub fn hanging_connect(self) -> Self {
        self.state().connect_hangs = true;
        self
    }

    /// Disconnecting fails, as it can for a peripheral that already dropped.
    pub fn failing_disconnect(self, reason: &str) -> Self {
        self.state().disconnect_error = Some(reason.to_string());
        self
    }

    pub fn disconnects(&self) -> usize {
        self.state().calls.iter().filter(|c| **c == MockCall::Disconnect).count()
    }

    pub fn rejecting_writes(self, reason: &str) -> Self {
        self.state().writes = WriteBehavior::Reject(reason.to_string());
        self
    }

    /// Writes fail because the link went down.
    pub fn dropping_link_on_write(self) -> Self {
        self.state().writes = WriteBehavior::DropLink;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn scan_timeouts(&self) -> Vec<Duration> {
        self.state().scan_timeouts.clone()
    }

    /// Payloads written so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Write { payload, .. } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Deliver a notification from the telemetry characteristic.
    pub async fn push_notification(&self, payload: Vec<u8>) {
        self.push_event(TransportEvent::Notification { characteristic: TELEMETRY_CHAR_UUID, payload })
            .await;
    }

    /// Deliver a transport-level disconnect.
    pub async fn push_disconnect(&self, reason: &str) {
        self.push_event(TransportEvent::Disconnected { reason: Some(reason.to_string()) }).await;
    }

    pub async fn push_event(&self, event: TransportEvent) {
        let sender = self.state().events.clone().expect("events() was not called");
        sender.send(event).await.expect("event receiver dropped");
    }

    /// Close the event channel without a disconnect event.
    pub fn close_events(&self) {
        self.state().events = None;
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    fn record(&self, call: MockCall) {
        self.state().calls.push(call);
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn scan(&self, timeout: Duration) -> Result<Vec<PeripheralHandle>> {
        self.record(MockCall::Scan);
        let mut state = self.state();
        state.scan_timeouts.push(timeout);
        Ok(state.scan.clone())
    }

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        self.record(MockCall::Connect(peripheral.address.clone()));
        let (error, hangs) = {
            let state = self.state();
            (state.connect_error.clone(), state.connect_hangs)
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        match error {
            Some(reason) => Err(LinkError::connection_failed(reason)),
            None => Ok(()),
        }
    }

    async fn discover_services(&self) -> Result<Vec<GattService>> {
        self.record(MockCall::DiscoverServices);
        Ok(self.state().services.clone())
    }

    async fn events(&self, capacity: usize) -> Result<mpsc::Receiver<TransportEvent>> {
        self.record(MockCall::Events);
        let (tx, rx) = mpsc::channel(capacity);
        self.state().events = Some(tx);
        Ok(rx)
    }

    async fn subscribe(&self, endpoint: &ServiceEndpoint) -> Result<()> {
        self.record(MockCall::Subscribe(endpoint.characteristic));
        Ok(())
    }

    async fn unsubscribe(&self, endpoint: &ServiceEndpoint) -> Result<()> {
        self.record(MockCall::Unsubscribe(endpoint.characteristic));
        Ok(())
    }

    async fn write(
        &self,
        _endpoint: &ServiceEndpoint,
        payload: &[u8],
        with_response: bool,
    ) -> Result<()> {
        self.record(MockCall::Write { payload: payload.to_vec(), with_response });
        let behavior = self.state().writes.clone();
        match behavior {
            WriteBehavior::Accept => Ok(()),
            WriteBehavior::Reject(reason) => Err(LinkError::command_write(reason)),
            WriteBehavior::DropLink => Err(LinkError::disconnected(Some("write on dead link".into()))),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(MockCall::Disconnect);
        let mut state = self.state();
        state.events = None;
        match &state.disconnect_error {
            Some(reason) => Err(LinkError::transport(
                "disconnect",
                std::io::Error::new(std::io::ErrorKind::NotConnected, reason.clone()),
            )),
            None => Ok(()),
        }
    }
}

/// The protocol service with one characteristic carrying `flags`.
pub fn protocol_services(flags: u8) -> Vec<GattService> {
    vec![GattService {
        uuid: SERVICE_UUID,
        characteristics: vec![GattCharacteristic {
            uuid: TELEMETRY_CHAR_UUID,
            properties: CharProperties::new(flags),
        }],
    }]
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
