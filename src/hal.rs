//! HAL context object: discovery, wiring and the caller-facing surface
//!
//! `Hal::open` discovers the supported devices, instantiates software
//! sensors on top of them, wires the dependency graph and starts the poll
//! engine. All further interaction goes through handles from the sensors
//! list. Everything lives in this object; dropping it (via `shutdown`)
//! tears the whole HAL down.

use crate::config::ConfigStore;
use crate::engine::record::SensorEvent;
use crate::engine::PollEngine;
use crate::error::{Error, Result};
use crate::iio::device::DeviceDescriptor;
use crate::iio::ChannelClass;
use crate::sensors::graph::wire;
use crate::sensors::{Handle, SensorInfo, SensorKind, SensorNode, SensorRegistry};
use crate::sysfs::SysfsTree;
use std::path::Path;
use std::sync::Arc;

/// One row of the supported-hardware table.
#[derive(Debug, Clone, Copy)]
pub struct SupportedSensor {
    /// Kernel driver name (content of the device `name` file)
    pub driver_name: &'static str,
    pub kind: SensorKind,
    /// Human-readable sensor name for the sensors list
    pub name: &'static str,
    /// Power consumption in mA
    pub power_ma: f32,
}

/// Devices this HAL knows how to drive.
pub const SUPPORTED_SENSORS: &[SupportedSensor] = &[
    SupportedSensor {
        driver_name: "asm330lhh_accel",
        kind: SensorKind::Accelerometer,
        name: "ASM330LHH Accelerometer Sensor",
        power_ma: 0.01,
    },
    SupportedSensor {
        driver_name: "asm330lhhx_accel",
        kind: SensorKind::Accelerometer,
        name: "ASM330LHHX Accelerometer Sensor",
        power_ma: 0.01,
    },
    SupportedSensor {
        driver_name: "asm330lhh_gyro",
        kind: SensorKind::Gyroscope,
        name: "ASM330LHH Gyroscope Sensor",
        power_ma: 0.01,
    },
    SupportedSensor {
        driver_name: "asm330lhhx_gyro",
        kind: SensorKind::Gyroscope,
        name: "ASM330LHHX Gyroscope Sensor",
        power_ma: 0.01,
    },
];

/// Scan elements of an accelerometer, declaration order
pub const ACCEL_CHANNELS: &[&str] = &["in_accel_x", "in_accel_y", "in_accel_z", "in_timestamp"];

/// Scan elements of a gyroscope, declaration order
pub const GYRO_CHANNELS: &[&str] = &["in_anglvel_x", "in_anglvel_y", "in_anglvel_z", "in_timestamp"];

/// Requested accelerometer range, m/s² (about 8 g)
pub const ACCEL_FULL_SCALE: f32 = 70.0;

/// Requested gyroscope range, rad/s (about 2000 dps)
pub const GYRO_FULL_SCALE: f32 = 35.0;

/// The HAL: owns the sensor registry, the poll engine and the tunables.
#[derive(Debug)]
pub struct Hal {
    registry: Arc<SensorRegistry>,
    engine: PollEngine,
    config: Arc<ConfigStore>,
    active: Vec<Handle>,
}

impl Hal {
    /// Discover hardware, build the sensor graph and start the engine.
    ///
    /// Discovery is independent per device: a missing or broken device is
    /// logged and skipped. Fails only when no supported sensor is present
    /// at all.
    pub fn open(tree: SysfsTree, dev_dir: &Path, config: Arc<ConfigStore>) -> Result<Self> {
        let mut registry = SensorRegistry::new();

        for supported in SUPPORTED_SENSORS {
            let (channels, class, full_scale) = match supported.kind {
                SensorKind::Accelerometer => (ACCEL_CHANNELS, ChannelClass::Accel, ACCEL_FULL_SCALE),
                SensorKind::Gyroscope => (GYRO_CHANNELS, ChannelClass::AngVel, GYRO_FULL_SCALE),
                _ => continue,
            };

            match DeviceDescriptor::discover(
                &tree,
                supported.driver_name,
                channels,
                class,
                Some(full_scale),
                supported.power_ma,
            ) {
                Ok(device) => {
                    log::info!(
                        "\"{}\": discovered as iio:device{} (fifo {}, scale {})",
                        supported.name,
                        device.id,
                        device.fifo_len,
                        device.resolution()
                    );
                    let handle = registry.next_handle();
                    registry.insert(SensorNode::hardware(handle, supported.kind, supported.name, device));
                }
                Err(Error::NotFound(_)) => {
                    log::debug!("\"{}\": not present", supported.driver_name);
                }
                Err(e) => {
                    // Isolation: one broken device never takes down the rest
                    log::warn!("\"{}\": discovery failed, skipping: {e}", supported.driver_name);
                }
            }
        }

        if registry.is_empty() {
            return Err(Error::NotFound("no supported iio sensors".into()));
        }

        for (kind, name) in [
            (SensorKind::AccelerometerUncalibrated, "Accelerometer Uncalibrated Sensor"),
            (SensorKind::GyroscopeUncalibrated, "Gyroscope Uncalibrated Sensor"),
        ] {
            let handle = registry.next_handle();
            registry.insert(SensorNode::software(handle, kind, name));
        }

        let outcome = wire(&mut registry);
        for (_, err) in &outcome.dropped {
            log::warn!("excluded from the sensor list: {err}");
        }
        inherit_software_info(&mut registry, &outcome.active);

        let registry = Arc::new(registry);
        let engine = PollEngine::start(
            Arc::clone(&registry),
            tree,
            Arc::clone(&config),
            dev_dir,
            &outcome.active,
        )?;

        log::info!("hal up with {} active sensors", outcome.active.len());

        Ok(Self {
            registry,
            engine,
            config,
            active: outcome.active,
        })
    }

    /// Caller-visible sensor descriptions, discovery order.
    pub fn sensors_list(&self) -> Vec<SensorInfo> {
        self.active
            .iter()
            .filter_map(|&h| self.registry.get(h))
            .map(|node| node.info.clone())
            .collect()
    }

    /// Enable or disable a sensor by handle.
    pub fn activate(&self, handle: Handle, enable: bool) -> Result<()> {
        self.engine.activate(handle, enable)
    }

    /// Program sampling period and maximum report latency.
    pub fn set_rate(&self, handle: Handle, period_ns: i64, max_latency_ns: i64) -> Result<()> {
        self.engine.set_rate(handle, period_ns, max_latency_ns)
    }

    /// Request a flush of batched data for a sensor.
    pub fn flush(&self, handle: Handle) -> Result<()> {
        self.engine.flush(handle)
    }

    /// Block for up to `max` events across all sensors.
    pub fn poll(&self, max: usize) -> Vec<SensorEvent> {
        self.engine.poll(max)
    }

    /// Report an ignition transition.
    ///
    /// Ignition off arms the park-detection pipeline and powers the
    /// accelerometer so gravity estimation can run; ignition on resets it.
    pub fn ignition(&self, on: bool) -> Result<()> {
        self.config.set_ignition_off(!on);
        if on {
            return Ok(());
        }
        for &handle in &self.active {
            let is_accel = self
                .registry
                .get(handle)
                .is_some_and(|n| n.info.kind == SensorKind::Accelerometer);
            if is_accel {
                self.engine.activate(handle, true)?;
            }
        }
        Ok(())
    }

    /// Shared cancellation token; setting it unblocks `poll`.
    pub fn cancellation(&self) -> Arc<std::sync::atomic::AtomicBool> {
        self.engine.cancellation()
    }

    /// Stop all worker threads and release the hardware.
    pub fn shutdown(self) {
        for &handle in &self.active {
            let enabled = self
                .registry
                .get(handle)
                .is_some_and(|n| n.state.lock().enabled);
            if enabled {
                if let Err(e) = self.engine.activate(handle, false) {
                    log::warn!("failed to disable sensor {handle} on shutdown: {e}");
                }
            }
        }
        self.engine.shutdown();
        log::info!("hal stopped");
    }
}

/// Software nodes report the physical characteristics of their provider.
fn inherit_software_info(registry: &mut SensorRegistry, active: &[Handle]) {
    let pairs: Vec<(Handle, Handle)> = active
        .iter()
        .filter_map(|&handle| {
            let node = registry.get(handle)?;
            if node.device.is_some() {
                return None;
            }
            node.deps.first().map(|&dep| (handle, dep))
        })
        .collect();

    for (handle, dep) in pairs {
        let Some(provider) = registry.get(dep) else {
            continue;
        };
        let (max_range, resolution, power_ma, fifo_len, wake_up) = (
            provider.info.max_range,
            provider.info.resolution,
            provider.info.power_ma,
            provider.info.fifo_len,
            provider.info.wake_up,
        );
        if let Some(node) = registry.get_mut(handle) {
            node.info.max_range = max_range;
            node.info.resolution = resolution;
            node.info.power_ma = power_ma;
            node.info.fifo_len = fifo_len;
            node.info.wake_up = wake_up;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_fails_with_no_hardware() {
        let dir = tempfile::tempdir().unwrap();
        let err = Hal::open(
            SysfsTree::with_root(dir.path()),
            Path::new("/dev"),
            Arc::new(ConfigStore::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.errno(), -libc::ENODEV);
    }

    #[test]
    fn supported_table_covers_both_kinds() {
        assert!(SUPPORTED_SENSORS
            .iter()
            .any(|s| s.kind == SensorKind::Accelerometer));
        assert!(SUPPORTED_SENSORS
            .iter()
            .any(|s| s.kind == SensorKind::Gyroscope));
        assert_eq!(ACCEL_CHANNELS.len(), 4);
        assert_eq!(GYRO_CHANNELS.len(), 4);
    }
}
