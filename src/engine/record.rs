//! Raw kernel scan records -> normalized sensor events

use crate::iio::DeviceDescriptor;
use crate::sensors::{Handle, SensorKind};

/// Payload of a normalized event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    /// Three-axis sample in physical units
    Vec3([f32; 3]),
    /// Raw three-axis sample plus bias estimate (software sensors)
    UncalibratedVec3 {
        raw: [f32; 3],
        bias: [f32; 3],
    },
    /// Single scalar (temperature, pressure)
    Scalar(f32),
    /// Synthetic marker: buffered data for the handle has been drained
    FlushComplete,
}

/// Normalized event record, constructed inside a worker thread and consumed
/// exactly once by the merged poll call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorEvent {
    /// Producing sensor handle
    pub handle: Handle,
    /// Kind of the producing sensor
    pub kind: SensorKind,
    /// Sensor-domain monotonic timestamp, nanoseconds
    pub timestamp_ns: i64,
    pub payload: Payload,
}

impl SensorEvent {
    /// Whether this is a flush-complete marker
    pub fn is_flush_complete(&self) -> bool {
        matches!(self.payload, Payload::FlushComplete)
    }
}

/// Decoder for one device's fixed-size scan records.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    offsets: Vec<usize>,
    record_size: usize,
}

impl RecordDecoder {
    pub fn new(device: &DeviceDescriptor) -> Self {
        Self {
            offsets: device.channel_offsets(),
            record_size: device.record_size(),
        }
    }

    /// Size in bytes of one record
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Decode one record into axis values and a timestamp.
    ///
    /// Returns up to three axis values (scaled) and the raw timestamp from
    /// the timestamp channel; `None` if the buffer is short.
    pub fn decode(&self, device: &DeviceDescriptor, buf: &[u8]) -> Option<([f32; 3], i64)> {
        if buf.len() < self.record_size {
            return None;
        }

        let mut values = [0.0f32; 3];
        let mut timestamp = 0i64;
        let mut axis = 0usize;

        for (ch, &offset) in device.channels.iter().zip(&self.offsets) {
            let bytes = ch.layout.bytes as usize;
            let raw = ch.layout.extract(&buf[offset..offset + bytes]);
            if ch.is_timestamp() {
                timestamp = raw;
            } else if axis < 3 {
                values[axis] = ch.convert(raw);
                axis += 1;
            }
        }

        Some((values, timestamp))
    }
}

/// Apply a sensor placement rotation to a three-axis sample.
pub fn apply_rotation(rot: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    [
        rot[0][0] * v[0] + rot[0][1] * v[1] + rot[0][2] * v[2],
        rot[1][0] * v[0] + rot[1][1] * v[1] + rot[1][2] * v[2],
        rot[2][0] * v[0] + rot[2][1] * v[1] + rot[2][2] * v[2],
    ]
}
