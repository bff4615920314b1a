//! Notification stream consumer
//!
//! Drains the transport's event channel on its own task, decodes each
//! telemetry notification and reports it to the sink together with the
//! arrival-time skew. A malformed frame is reported and skipped; it never
//! ends the stream. A disconnect event (or the channel closing) terminates
//! the link for every flow.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::codec;
use crate::session::LinkSignals;
use crate::sink::TelemetrySink;
use crate::transport::TransportEvent;
use crate::types::SkewSample;
use crate::{Result, TelemetryFrame};

/// Source of host wall-clock time for skew computation.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The host's system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

/// Decodes telemetry notifications and forwards them to a sink.
pub struct NotificationConsumer {
    sink: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    characteristic: Uuid,
    frames: u64,
    malformed: u64,
}

impl NotificationConsumer {
    /// Create a consumer for notifications from `characteristic`.
    pub fn new(sink: Arc<dyn TelemetrySink>, clock: Arc<dyn Clock>, characteristic: Uuid) -> Self {
        Self { sink, clock, characteristic, frames: 0, malformed: 0 }
    }

    /// Handle one raw notification payload.
    ///
    /// On success the frame and its skew go to the sink; on failure the
    /// observed length is reported as a malformed frame. The error is also
    /// returned for callers that want it, but it is never fatal.
    pub fn on_notification(&mut self, raw: &[u8]) -> Result<TelemetryFrame> {
        match codec::decode(raw) {
            Ok(frame) => {
                let skew = SkewSample::between(self.clock.now_ms(), &frame);
                self.frames += 1;
                trace!(
                    "Frame {}: device_ms={}, skew_ms={}",
                    self.frames,
                    frame.timestamp_ms,
                    skew.as_millis()
                );
                self.sink.report_frame(frame, skew.as_millis());
                Ok(frame)
            }
            Err(e) => {
                self.malformed += 1;
                debug!("Failed to decode notification: {}", e);
                self.sink.report_decode_error(raw.len());
                Err(e)
            }
        }
    }

    /// Frames decoded so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Malformed payloads seen so far
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Drain `events` until the link ends or `signals` cancels the flows.
    pub(crate) async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        signals: &LinkSignals,
    ) {
        info!("Notification consumer started");
        let cancel: CancellationToken = signals.token();

        loop {
            // Cancellation wins over queued events so that nothing reaches
            // the sink once the session is closing.
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Notification consumer cancelled");
                    break;
                }
                event = events.recv() => event,
            };

            match event {
                Some(TransportEvent::Notification { characteristic, payload })
                    if characteristic == self.characteristic =>
                {
                    let _ = self.on_notification(&payload);
                }
                Some(TransportEvent::Notification { characteristic, payload }) => {
                    trace!(
                        "Ignoring {} byte notification from {}",
                        payload.len(),
                        characteristic
                    );
                }
                Some(TransportEvent::Disconnected { reason }) => {
                    info!("Transport reported disconnect: {}", reason.as_deref().unwrap_or("no reason"));
                    signals.terminate(reason);
                    break;
                }
                None => {
                    info!("Transport event channel closed");
                    signals.terminate(Some("event channel closed".to_string()));
                    break;
                }
            }
        }

        info!(
            "Notification consumer ended ({} frames, {} malformed)",
            self.frames, self.malformed
        );
    }
}
