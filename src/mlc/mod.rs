//! Machine-learning-core threshold programming
//!
//! While the vehicle is parked the accelerometer feeds a gravity estimator;
//! once a stable gravity vector is found, per-axis comparator thresholds at
//! gravity plus/minus a configured delta are encoded as half-precision
//! words and written to the classifier device's `fsm_threshold` attribute.
//! The classifier then watches for towing/jacking autonomously and the
//! feeding accelerometer can be switched off.

pub mod float16;
pub mod gravity;

use crate::error::Result;
use crate::mlc::float16::float16;
use crate::mlc::gravity::GravityEstimator;
use crate::sysfs::SysfsTree;

/// Standard gravity, m/s²
pub const GRAVITY_EARTH: f32 = 9.80665;

/// Default threshold delta around the gravity vector, g
pub const DEFAULT_DELTA_G: f32 = 0.025;

/// Sysfs attribute holding the classifier comparator thresholds
const FSM_THRESHOLD_FILE: &str = "fsm_threshold";

/// Device name suffix identifying the classifier instance
const MLC_NAME_SUFFIX: &str = "mlc";

/// Per-axis comparator words: `[high, low]` half-precision pairs for x, y, z.
pub type Thresholds = [[u16; 2]; 3];

/// Compute comparator thresholds around a gravity vector (g).
pub fn compute_thresholds(gvec: [f32; 3], delta_g: f32) -> Thresholds {
    let mut thresh = [[0u16; 2]; 3];
    for axis in 0..3 {
        thresh[axis][0] = float16(gvec[axis] + delta_g);
        thresh[axis][1] = float16(gvec[axis] - delta_g);
    }
    thresh
}

/// Render thresholds as the comma-separated hex byte string the classifier
/// driver parses: per axis, the high word's bytes (high byte first) then
/// the low word's.
pub fn threshold_string(thresh: &Thresholds) -> String {
    let mut bytes = [0u8; 12];
    for axis in 0..3 {
        bytes[axis * 4] = (thresh[axis][0] >> 8) as u8;
        bytes[axis * 4 + 1] = (thresh[axis][0] & 0xFF) as u8;
        bytes[axis * 4 + 2] = (thresh[axis][1] >> 8) as u8;
        bytes[axis * 4 + 3] = (thresh[axis][1] & 0xFF) as u8;
    }
    bytes
        .iter()
        .map(|b| format!("{b:2x}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Write a threshold string to the classifier device's `fsm_threshold`.
///
/// The classifier is located by its device name suffix.
pub fn program_thresholds(tree: &SysfsTree, thresholds: &str) -> Result<()> {
    let id = tree.device_by_type(MLC_NAME_SUFFIX)?;
    let path = tree.device_dir(id).join(FSM_THRESHOLD_FILE);
    tree.write_str(&path, thresholds)
}

/// Arming state machine driven by accelerometer samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmingState {
    /// Fresh estimator, waiting to arm
    Reset,
    /// Waiting for the ignition-off trigger
    Armed,
    /// Estimating gravity; terminal once thresholds are produced
    Running,
}

/// Drives the park-detection pipeline: arming on ignition-off, gravity
/// estimation, threshold computation.
#[derive(Debug)]
pub struct MlcArming {
    state: ArmingState,
    estimator: GravityEstimator,
    ignition_off: bool,
    done: bool,
}

impl MlcArming {
    pub fn new() -> Self {
        Self {
            state: ArmingState::Reset,
            estimator: GravityEstimator::new(),
            ignition_off: false,
            done: false,
        }
    }

    /// Signal an ignition transition. `off = true` moves an armed pipeline
    /// into the running state on the next sample.
    pub fn set_ignition_off(&mut self, off: bool) {
        self.ignition_off = off;
        if !off {
            // Ignition back on: restart estimation from scratch
            self.state = ArmingState::Reset;
            self.done = false;
        }
    }

    /// Whether thresholds have been produced and the feeding accelerometer
    /// can be powered down
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one accelerometer sample in m/s². Returns comparator
    /// thresholds exactly once, when the gravity estimate settles.
    pub fn on_sample(&mut self, accel_ms2: [f32; 3], timestamp_ns: i64, delta_g: f32) -> Option<Thresholds> {
        match self.state {
            ArmingState::Reset => {
                self.estimator = GravityEstimator::new();
                self.state = ArmingState::Armed;
                None
            }
            ArmingState::Armed => {
                if self.ignition_off {
                    self.ignition_off = false;
                    self.state = ArmingState::Running;
                }
                None
            }
            ArmingState::Running => {
                if self.done {
                    return None;
                }
                let acc_g = [
                    accel_ms2[0] / GRAVITY_EARTH,
                    accel_ms2[1] / GRAVITY_EARTH,
                    accel_ms2[2] / GRAVITY_EARTH,
                ];
                let gvec = self.estimator.update(acc_g, timestamp_ns)?;
                self.done = true;
                Some(compute_thresholds(gvec, delta_g))
            }
        }
    }
}

impl Default for MlcArming {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlc::float16::float16_to_f32;

    #[test]
    fn thresholds_bracket_gravity() {
        let thresh = compute_thresholds([0.0, 0.0, 1.0], DEFAULT_DELTA_G);
        let high = float16_to_f32(thresh[2][0]);
        let low = float16_to_f32(thresh[2][1]);
        assert!(high > 1.0 && high < 1.05, "high {high}");
        assert!(low < 1.0 && low > 0.95, "low {low}");
        // Near-zero axes get symmetric signed words
        assert_eq!(thresh[0][0] & 0x8000, 0);
        assert_eq!(thresh[0][1] & 0x8000, 0x8000);
    }

    #[test]
    fn threshold_string_is_twelve_hex_bytes_high_first() {
        // 1.0 + 0.025 -> 0x3c19, 1.0 - 0.025 -> 0x3bcc
        let thresh = compute_thresholds([0.0, 0.0, 1.0], DEFAULT_DELTA_G);
        let s = threshold_string(&thresh);
        assert_eq!(s.split(',').count(), 12);

        let parts: Vec<&str> = s.split(',').collect();
        let z_high = u16::from_str_radix(parts[8].trim(), 16).unwrap() << 8
            | u16::from_str_radix(parts[9].trim(), 16).unwrap();
        assert_eq!(z_high, thresh[2][0]);
    }

    #[test]
    fn single_digit_bytes_are_space_padded() {
        let s = threshold_string(&[[0x0005, 0x0a0b]; 3]);
        assert!(s.starts_with(" 0, 5, a, b"), "got {s:?}");
    }

    #[test]
    fn pipeline_waits_for_ignition_off() {
        let mut arming = MlcArming::new();
        // Reset -> Armed on the first sample
        assert!(arming.on_sample([0.0, 0.0, GRAVITY_EARTH], 0, DEFAULT_DELTA_G).is_none());
        // Armed, no trigger: stays put
        for i in 1..50 {
            assert!(arming
                .on_sample([0.0, 0.0, GRAVITY_EARTH], i * 77_000_000, DEFAULT_DELTA_G)
                .is_none());
        }

        arming.set_ignition_off(true);
        let mut thresh = None;
        for i in 50..120 {
            if let Some(t) = arming.on_sample([0.0, 0.0, GRAVITY_EARTH], i * 77_000_000, DEFAULT_DELTA_G) {
                thresh = Some(t);
                break;
            }
        }
        let thresh = thresh.expect("thresholds after static period");
        assert!(arming.is_done());
        let high = float16_to_f32(thresh[2][0]);
        assert!((high - 1.025).abs() < 1e-3);
    }

    #[test]
    fn thresholds_are_produced_once() {
        let mut arming = MlcArming::new();
        arming.on_sample([0.0, 0.0, GRAVITY_EARTH], 0, DEFAULT_DELTA_G);
        arming.set_ignition_off(true);

        let mut produced = 0;
        for i in 1..200 {
            if arming
                .on_sample([0.0, 0.0, GRAVITY_EARTH], i * 77_000_000, DEFAULT_DELTA_G)
                .is_some()
            {
                produced += 1;
            }
        }
        assert_eq!(produced, 1);
    }
}
