//! IndriyaHAL - Linux IIO sensor hardware abstraction
//!
//! Discovers ST IMU devices (ASM330LHH family) through sysfs, runs one
//! reader thread per active sensor against the kernel character devices,
//! and hands normalized, placement-rotated events to the caller through a
//! merged poll interface. The accelerometer additionally feeds a gravity
//! estimator that programs the chip's machine-learning-core comparator
//! thresholds for autonomous towing/jack detection while the vehicle is
//! parked.

pub mod config;
pub mod engine;
pub mod error;
pub mod hal;
pub mod iio;
pub mod mlc;
pub mod sensors;
pub mod sysfs;

// Re-export commonly used types
pub use config::{AppConfig, ConfigStore, HalConfig};
pub use engine::record::{Payload, SensorEvent};
pub use error::{Error, Result};
pub use hal::Hal;
pub use sensors::{Handle, SensorInfo, SensorKind, INVALID_HANDLE};
pub use sysfs::SysfsTree;
