//! Telemetry frame and derived skew sample

use serde::{Deserialize, Serialize};

/// One decoded telemetry record from the gas-sensor peripheral.
///
/// This is the fundamental data unit that flows from the notification
/// consumer to the telemetry sink. It is immutable once decoded and is not
/// retained by the link after it has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Device clock in milliseconds since an unspecified device epoch
    pub timestamp_ms: u64,

    /// Elapsed experiment time in seconds
    pub time_s: f32,

    /// Carbon monoxide concentration (ppm)
    pub co_ppm: f32,

    /// Relative humidity (%)
    pub humidity_pct: f32,

    /// Temperature (°C)
    pub temperature_c: f32,

    /// Gas flow rate (mL/min)
    pub flow_rate: f32,

    /// Sensor heater voltage (V)
    pub heater_voltage: f32,
}

/// Absolute difference between host arrival time and device timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SkewSample(u64);

impl SkewSample {
    /// Compute the skew for a frame that arrived at `host_arrival_ms`.
    pub fn between(host_arrival_ms: u64, frame: &TelemetryFrame) -> Self {
        Self(host_arrival_ms.abs_diff(frame.timestamp_ms))
    }

    /// Skew in milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_at(timestamp_ms: u64) -> TelemetryFrame {
        TelemetryFrame {
            timestamp_ms,
            time_s: 0.0,
            co_ppm: 0.0,
            humidity_pct: 0.0,
            temperature_c: 0.0,
            flow_rate: 0.0,
            heater_voltage: 0.0,
        }
    }

    #[test]
    fn skew_is_absolute_difference() {
        assert_eq!(SkewSample::between(2000, &frame_at(1000)).as_millis(), 1000);
        assert_eq!(SkewSample::between(1000, &frame_at(2000)).as_millis(), 1000);
        assert_eq!(SkewSample::between(1500, &frame_at(1500)).as_millis(), 0);
    }

    #[test]
    fn skew_handles_extreme_clocks() {
        assert_eq!(SkewSample::between(0, &frame_at(u64::MAX)).as_millis(), u64::MAX);
        assert_eq!(SkewSample::between(u64::MAX, &frame_at(0)).as_millis(), u64::MAX);
    }
}
