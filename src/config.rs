//! Configuration: daemon settings and runtime tunables
//!
//! Two layers. [`AppConfig`] is the TOML file read once at startup (paths,
//! logging). [`HalConfig`] is the runtime tunable set (sensor placement,
//! algorithm thresholds, ignition flag) read from a key=value file that an
//! installer may rewrite while the daemon runs; a watcher thread reloads it
//! on every close-after-write and readers take cheap snapshot copies.

use crate::error::{Error, Result};
use notify::{RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// File name of the runtime tunable file inside the config directory
pub const HAL_CONFIG_FILE: &str = "hal_config";

/// Default directory holding the runtime tunable file
pub const DEFAULT_CONFIG_DIR: &str = "/etc/sensorhal";

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub hal: HalPaths,
    pub logging: LoggingConfig,
}

/// Filesystem roots the daemon operates on
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HalPaths {
    /// Sysfs directory holding the IIO devices
    pub sysfs_dir: String,
    /// Directory holding the `/dev/iio:deviceN` character devices
    pub dev_dir: String,
    /// Directory watched for the runtime tunable file
    pub config_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&contents).map_err(|e| Error::Parse {
            path: path.display().to_string(),
            what: e.to_string(),
        })
    }

    /// Defaults for a standard Linux host
    pub fn defaults() -> Self {
        Self {
            hal: HalPaths {
                sysfs_dir: crate::sysfs::DEFAULT_IIO_DIR.to_string(),
                dev_dir: "/dev".to_string(),
                config_dir: DEFAULT_CONFIG_DIR.to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

/// Sensor mounting: rotation into the vehicle frame plus mount location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub rot: [[f32; 3]; 3],
    /// Mount position in meters
    pub location: [f32; 3],
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            rot: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            location: [0.0; 3],
        }
    }
}

/// Runtime tunables, copied out as a snapshot on every read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalConfig {
    pub placement: Placement,
    /// Mounting orientation as Euler angles, degrees
    pub euler_deg: [f32; 3],
    /// Towing/jack detection threshold delta, mg
    pub towing_jack_delta_mg: f32,
    /// Ignition-off flag; arms the park-detection pipeline
    pub ignition_off: bool,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            placement: Placement::default(),
            euler_deg: [0.0; 3],
            towing_jack_delta_mg: crate::mlc::DEFAULT_DELTA_G * 1000.0,
            ignition_off: false,
        }
    }
}

impl HalConfig {
    /// Threshold delta in g
    pub fn delta_g(&self) -> f32 {
        self.towing_jack_delta_mg / 1000.0
    }

    /// Merge values parsed from a key=value file into this snapshot.
    ///
    /// Lookup is by key substring, one value per key. A missing or
    /// malformed field leaves the previous value in place.
    pub fn parse_into(&mut self, text: &str) {
        if let Some(values) = parse_float_list(text, "imu_sensor_placement = ") {
            if values.len() >= 12 {
                for row in 0..3 {
                    self.placement.rot[row] = [values[row * 3], values[row * 3 + 1], values[row * 3 + 2]];
                }
                self.placement.location = [values[9], values[10], values[11]];
            } else {
                log::warn!("imu_sensor_placement: expected 12 values, got {}", values.len());
            }
        }

        if let Some(values) = parse_float_list(text, "imu_sensor_euler_angles = ") {
            if values.len() >= 3 {
                self.euler_deg = [values[0], values[1], values[2]];
            } else {
                log::warn!("imu_sensor_euler_angles: expected 3 values, got {}", values.len());
            }
        }

        if let Some(value) = parse_scalar(text, "algo_towing_jack_delta_th = ") {
            self.towing_jack_delta_mg = value;
        }

        if let Some(value) = parse_scalar(text, "ignition_off = ") {
            self.ignition_off = value != 0.0;
        }
    }
}

/// Extract the bracketed float list following `key`, e.g.
/// `key = [1.0, 2.0, 3.0]`. Returns `None` when the key is absent or the
/// list is malformed.
fn parse_float_list(text: &str, key: &str) -> Option<Vec<f32>> {
    let rest = &text[text.find(key)? + key.len()..];
    let open = rest.find('[')?;
    let close = rest.find(']')?;
    if close < open {
        return None;
    }

    let mut values = Vec::new();
    for tok in rest[open + 1..close].split(',') {
        values.push(tok.trim().parse::<f32>().ok()?);
    }
    Some(values)
}

/// Extract the scalar following `key`. Returns `None` when the key is
/// absent or the value does not parse.
fn parse_scalar(text: &str, key: &str) -> Option<f32> {
    let rest = &text[text.find(key)? + key.len()..];
    let end = rest.find('\n').unwrap_or(rest.len());
    rest[..end].trim().parse::<f32>().ok()
}

/// Shared runtime tunable store.
///
/// One mutex with short critical sections on both sides; readers copy the
/// snapshot out rather than holding the lock across work.
#[derive(Debug, Default)]
pub struct ConfigStore {
    config: Mutex<HalConfig>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot copy of the current tunables
    pub fn get(&self) -> HalConfig {
        *self.config.lock()
    }

    /// Set the ignition-off flag from the caller-facing ABI
    pub fn set_ignition_off(&self, off: bool) {
        self.config.lock().ignition_off = off;
    }

    /// Reload tunables from the given file; malformed fields keep their
    /// previous values.
    pub fn reload(&self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut config = self.config.lock();
        config.parse_into(&text);
        log::debug!("reloaded tunables from {}", path.display());
        Ok(())
    }
}

/// Watches the config directory and reloads the tunable file on change.
///
/// The watcher and its thread run for the process lifetime; dropping the
/// handle stops them.
pub struct ConfigWatcher {
    // Held to keep the OS watch alive
    _watcher: notify::RecommendedWatcher,
    handle: Option<thread::JoinHandle<()>>,
    stop_tx: mpsc::Sender<notify::Result<notify::Event>>,
}

impl ConfigWatcher {
    /// Start watching `config_dir` for writes to the tunable file.
    ///
    /// The file is loaded once up front if present; a missing file is not
    /// an error (defaults apply until one appears).
    pub fn spawn(store: Arc<ConfigStore>, config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(HAL_CONFIG_FILE);
        if file_path.exists() {
            store.reload(&file_path)?;
        }

        let (tx, rx) = mpsc::channel();
        let stop_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(tx)
            .map_err(|e| Error::InvalidArgument(format!("config watcher: {e}")))?;
        watcher
            .watch(config_dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::InvalidArgument(format!("watch {}: {e}", config_dir.display())))?;

        let handle = thread::Builder::new()
            .name("hal-config".into())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            log::warn!("config watch error: {e}");
                            continue;
                        }
                    };
                    // Shutdown marker injected through the channel
                    if event.paths.is_empty() && matches!(event.kind, notify::EventKind::Other) {
                        break;
                    }
                    let touched = event.paths.iter().any(|p| p == &file_path);
                    if touched && (event.kind.is_modify() || event.kind.is_create()) {
                        if let Err(e) = store.reload(&file_path) {
                            log::warn!("config reload failed: {e}");
                        }
                    }
                }
            })
            .map_err(|e| Error::io(config_dir, e))?;

        Ok(Self {
            _watcher: watcher,
            handle: Some(handle),
            stop_tx,
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(Ok(notify::Event::new(notify::EventKind::Other)));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
