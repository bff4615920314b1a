//! Telemetry sink contract and built-in sinks
//!
//! The link never stores telemetry. Every decoded frame, malformed payload
//! and failed command write is handed to a [`TelemetrySink`] and forgotten.
//! Sink callbacks run on the notification consumer's task (frames, decode
//! errors) or the command loop's task (command errors), so they must return
//! quickly and never block.

mod feed;

pub use feed::{FrameReport, TelemetryFeed};

use std::sync::Arc;

use tracing::{info, warn};

use crate::TelemetryFrame;

/// Consumer of decoded telemetry and per-frame/per-command errors.
pub trait TelemetrySink: Send + Sync + 'static {
    /// A frame decoded successfully; `skew_ms` is the absolute distance
    /// between host arrival time and the frame's device timestamp.
    fn report_frame(&self, frame: TelemetryFrame, skew_ms: u64);

    /// A notification payload was not a valid frame.
    fn report_decode_error(&self, length_observed: usize);

    /// A command could not be written to the peripheral.
    fn report_command_error(&self, detail: &str);
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Arc<S> {
    fn report_frame(&self, frame: TelemetryFrame, skew_ms: u64) {
        (**self).report_frame(frame, skew_ms)
    }

    fn report_decode_error(&self, length_observed: usize) {
        (**self).report_decode_error(length_observed)
    }

    fn report_command_error(&self, detail: &str) {
        (**self).report_command_error(detail)
    }
}

/// Extension trait to combine sinks
pub trait SinkExt: TelemetrySink + Sized {
    /// Send every callback to `self`, then to `other`.
    fn tee<S: TelemetrySink>(self, other: S) -> Tee<Self, S> {
        Tee { first: self, second: other }
    }
}

impl<T: TelemetrySink> SinkExt for T {}

/// Sink that forwards every callback to two sinks in order.
#[derive(Debug, Clone)]
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: TelemetrySink, B: TelemetrySink> TelemetrySink for Tee<A, B> {
    fn report_frame(&self, frame: TelemetryFrame, skew_ms: u64) {
        self.first.report_frame(frame, skew_ms);
        self.second.report_frame(frame, skew_ms);
    }

    fn report_decode_error(&self, length_observed: usize) {
        self.first.report_decode_error(length_observed);
        self.second.report_decode_error(length_observed);
    }

    fn report_command_error(&self, detail: &str) {
        self.first.report_command_error(detail);
        self.second.report_command_error(detail);
    }
}

/// Sink that writes everything to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn report_frame(&self, frame: TelemetryFrame, skew_ms: u64) {
        info!(
            device_ms = frame.timestamp_ms,
            skew_ms,
            time_s = frame.time_s,
            co_ppm = frame.co_ppm,
            humidity_pct = frame.humidity_pct,
            temperature_c = frame.temperature_c,
            flow_rate = frame.flow_rate,
            heater_voltage = frame.heater_voltage,
            "Telemetry frame"
        );
    }

    fn report_decode_error(&self, length_observed: usize) {
        warn!(length_observed, "Malformed telemetry frame skipped");
    }

    fn report_command_error(&self, detail: &str) {
        warn!("Error sending command: {}", detail);
    }
}
