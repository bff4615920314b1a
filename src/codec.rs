//! Binary telemetry frame codec and protocol constants
//!
//! Each notification from the peripheral carries exactly one frame:
//!
//! | Offset | Type      | Field            |
//! |--------|-----------|------------------|
//! | 0      | `u64` BE  | `timestamp_ms`   |
//! | 8      | `f32` BE  | `time_s`         |
//! | 12     | `f32` BE  | `co_ppm`         |
//! | 16     | `f32` BE  | `humidity_pct`   |
//! | 20     | `f32` BE  | `temperature_c`  |
//! | 24     | `f32` BE  | `flow_rate`      |
//! | 28     | `f32` BE  | `heater_voltage` |
//!
//! There is no checksum, sequence number or delimiter. Decoding is purely
//! structural: NaN and infinite readings pass through unchanged.

use uuid::Uuid;

use crate::{LinkError, Result, TelemetryFrame};

/// Size of one telemetry frame on the wire.
pub const FRAME_LEN: usize = 32;

/// Service envelope advertised by the peripheral.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef0);

/// Characteristic carrying telemetry notifications and accepting command writes.
pub const TELEMETRY_CHAR_UUID: Uuid = Uuid::from_u128(0x87654321_4321_6789_4321_0fedcba98765);

const TIMESTAMP_OFFSET: usize = 0;
const TIME_S_OFFSET: usize = 8;
const CO_PPM_OFFSET: usize = 12;
const HUMIDITY_OFFSET: usize = 16;
const TEMPERATURE_OFFSET: usize = 20;
const FLOW_RATE_OFFSET: usize = 24;
const HEATER_VOLTAGE_OFFSET: usize = 28;

/// Decode one notification payload into a frame.
///
/// Fails with [`LinkError::FrameLength`] unless `bytes` is exactly
/// [`FRAME_LEN`] long.
pub fn decode(bytes: &[u8]) -> Result<TelemetryFrame> {
    let frame: &[u8; FRAME_LEN] =
        bytes.try_into().map_err(|_| LinkError::frame_length(bytes.len()))?;

    Ok(TelemetryFrame {
        timestamp_ms: read_u64_be(frame, TIMESTAMP_OFFSET),
        time_s: read_f32_be(frame, TIME_S_OFFSET),
        co_ppm: read_f32_be(frame, CO_PPM_OFFSET),
        humidity_pct: read_f32_be(frame, HUMIDITY_OFFSET),
        temperature_c: read_f32_be(frame, TEMPERATURE_OFFSET),
        flow_rate: read_f32_be(frame, FLOW_RATE_OFFSET),
        heater_voltage: read_f32_be(frame, HEATER_VOLTAGE_OFFSET),
    })
}

/// Encode a frame into its 32-byte wire form.
pub fn encode(frame: &TelemetryFrame) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    out[TIMESTAMP_OFFSET..TIME_S_OFFSET].copy_from_slice(&frame.timestamp_ms.to_be_bytes());

    let readings = [
        (TIME_S_OFFSET, frame.time_s),
        (CO_PPM_OFFSET, frame.co_ppm),
        (HUMIDITY_OFFSET, frame.humidity_pct),
        (TEMPERATURE_OFFSET, frame.temperature_c),
        (FLOW_RATE_OFFSET, frame.flow_rate),
        (HEATER_VOLTAGE_OFFSET, frame.heater_voltage),
    ];
    for (offset, value) in readings {
        out[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }
    out
}

fn read_u64_be(frame: &[u8; FRAME_LEN], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&frame[offset..offset + 8]);
    u64::from_be_bytes(raw)
}

fn read_f32_be(frame: &[u8; FRAME_LEN], offset: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&frame[offset..offset + 4]);
    f32::from_be_bytes(raw)
}
