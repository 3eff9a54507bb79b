//! Thread-per-node poll engine
//!
//! Every active hardware node gets a long-lived data thread reading scan
//! records from its character device, and event-capable nodes get a second
//! thread on the kernel event descriptor. Normalized events flow through
//! one bounded pipe per node; a full pipe blocks the producer rather than
//! dropping samples. The caller-facing `poll` multiplexes readiness across
//! all pipes and drains whatever is available.
//!
//! Threads block on a short-timeout readiness wait rather than directly in
//! the kernel read, so a process-wide shutdown flag is observed within one
//! timeout period and every thread can be joined.

pub mod record;

use crate::config::ConfigStore;
use crate::engine::record::{apply_rotation, Payload, RecordDecoder, SensorEvent};
use crate::error::{Error, Result};
use crate::iio::device::enable_device;
use crate::iio::event::{event_fd, read_event, EventCode};
use crate::config::HalConfig;
use crate::mlc::{program_thresholds, threshold_string, MlcArming, Thresholds};
use crate::sensors::{Handle, SensorKind, SensorNode, SensorRegistry};
use crate::sysfs::SysfsTree;
use crossbeam_channel::{bounded, Receiver, Select, SendTimeoutError, Sender};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Per-node pipe depth, in events
pub const PIPE_CAPACITY: usize = 64;

/// Readiness-wait timeout; bounds shutdown latency
const POLL_TIMEOUT_MS: i32 = 200;

/// State shared by all worker threads.
struct WorkerShared {
    registry: Arc<SensorRegistry>,
    tree: SysfsTree,
    config: Arc<ConfigStore>,
    senders: HashMap<Handle, Sender<SensorEvent>>,
    shutdown: Arc<AtomicBool>,
}

/// The engine: owns the worker threads and the consumer ends of the pipes.
#[derive(Debug)]
pub struct PollEngine {
    registry: Arc<SensorRegistry>,
    tree: SysfsTree,
    senders: HashMap<Handle, Sender<SensorEvent>>,
    receivers: Vec<(Handle, Receiver<SensorEvent>)>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl PollEngine {
    /// Spawn worker threads for the active nodes and wire up the pipes.
    ///
    /// `dev_dir` is where the `/dev/iio:deviceN` character devices live.
    /// A node whose device cannot be opened logs and its thread exits; the
    /// engine itself still comes up.
    pub fn start(
        registry: Arc<SensorRegistry>,
        tree: SysfsTree,
        config: Arc<ConfigStore>,
        dev_dir: &Path,
        active: &[Handle],
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut senders = HashMap::new();
        let mut receivers = Vec::new();
        for &handle in active {
            let (tx, rx) = bounded(PIPE_CAPACITY);
            senders.insert(handle, tx);
            receivers.push((handle, rx));
        }

        let shared = Arc::new(WorkerShared {
            registry: Arc::clone(&registry),
            tree: tree.clone(),
            config,
            senders: senders.clone(),
            shutdown: Arc::clone(&shutdown),
        });

        let mut workers = Vec::new();
        for &handle in active {
            let Some(node) = registry.get(handle) else {
                continue;
            };
            let Some(device) = &node.device else {
                continue;
            };
            let dev_node: PathBuf = dev_dir.join(format!("iio:device{}", device.id));

            let ctx = Arc::clone(&shared);
            let path = dev_node.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("hal-data-{}", device.name))
                    .spawn(move || data_worker(&ctx, handle, &path))
                    .map_err(|e| Error::io(&dev_node, e))?,
            );

            if node.has_event_channel() {
                let ctx = Arc::clone(&shared);
                let path = dev_node.clone();
                workers.push(
                    thread::Builder::new()
                        .name(format!("hal-event-{}", device.name))
                        .spawn(move || event_worker(&ctx, handle, &path))
                        .map_err(|e| Error::io(&dev_node, e))?,
                );
            }
        }

        Ok(Self {
            registry,
            tree,
            senders,
            receivers,
            shutdown,
            workers,
        })
    }

    /// Enable or disable a sensor.
    ///
    /// Hardware nodes toggle their kernel data channels; software nodes
    /// additionally keep their providing hardware powered while any
    /// consumer is active.
    pub fn activate(&self, handle: Handle, enable: bool) -> Result<()> {
        let node = self.node(handle)?;
        {
            let mut state = node.state.lock();
            if state.enabled == enable {
                return Ok(());
            }
            state.enabled = enable;
        }
        log::debug!("\"{}\": {}", node.info.name, if enable { "enabled" } else { "disabled" });

        if let Some(device) = &node.device {
            return enable_device(&self.tree, &device.sysfs_path, enable);
        }

        // Software node: forward to each provider unless another consumer
        // still needs it
        for &dep in &node.deps {
            let Some(provider) = self.registry.get(dep) else {
                continue;
            };
            let Some(device) = &provider.device else {
                continue;
            };
            if !enable && self.hardware_in_use(dep, handle) {
                continue;
            }
            enable_device(&self.tree, &device.sysfs_path, enable)?;
        }
        Ok(())
    }

    /// Program sampling period and batching latency.
    ///
    /// Picks the slowest available frequency not below the request, falling
    /// back to the fastest. Latency translates to a FIFO watermark in
    /// samples.
    pub fn set_rate(&self, handle: Handle, period_ns: i64, max_latency_ns: i64) -> Result<()> {
        if period_ns <= 0 {
            return Err(Error::InvalidArgument(format!("period {period_ns}ns")));
        }
        let node = self.node(handle)?;
        {
            let mut state = node.state.lock();
            state.period_ns = period_ns;
            state.max_latency_ns = max_latency_ns;
        }

        let Some((_, device)) = self.provider_device(node) else {
            return Ok(());
        };

        let requested_hz = 1e9 / period_ns as f32;
        let frequency = device
            .sampling_frequencies
            .iter()
            .copied()
            .find(|&f| f >= requested_hz)
            .or_else(|| device.sampling_frequencies.last().copied())
            .ok_or_else(|| Error::InvalidArgument("no sampling frequencies".into()))?;
        self.tree
            .write_int(&device.sysfs_path.join("sampling_frequency"), frequency as i64)?;

        if device.fifo_len > 0 {
            let watermark = (max_latency_ns / period_ns).clamp(1, i64::from(device.fifo_len));
            self.tree
                .write_int(&device.sysfs_path.join("hwfifo_watermark"), watermark)?;
        }

        log::debug!(
            "\"{}\": rate {:.1} Hz, latency {} ns",
            node.info.name,
            frequency,
            max_latency_ns
        );
        Ok(())
    }

    /// Flush batched data for a sensor.
    ///
    /// With a hardware FIFO the kernel is asked to drain it and the flush
    /// completion arrives through the event channel; without one there is
    /// nothing buffered and the completion marker is injected directly.
    pub fn flush(&self, handle: Handle) -> Result<()> {
        let node = self.node(handle)?;
        if !node.state.lock().enabled {
            return Err(Error::InvalidArgument(format!(
                "flush on disabled sensor {handle}"
            )));
        }

        if let Some((_, device)) = self.provider_device(node) {
            if device.fifo_len > 0 {
                return self
                    .tree
                    .write_int(&device.sysfs_path.join("hwfifo_flush"), 1);
            }
        }

        self.inject(SensorEvent {
            handle,
            kind: node.info.kind,
            timestamp_ns: 0,
            payload: Payload::FlushComplete,
        });
        Ok(())
    }

    /// Block until events are available on any pipe, then drain up to `max`.
    ///
    /// Returns empty only on shutdown. No cross-node ordering is implied:
    /// pipes are drained in node order, not timestamp order.
    pub fn poll(&self, max: usize) -> Vec<SensorEvent> {
        let mut out = Vec::new();
        if max == 0 || self.receivers.is_empty() {
            return out;
        }

        loop {
            for (_, rx) in &self.receivers {
                while out.len() < max {
                    match rx.try_recv() {
                        Ok(ev) => out.push(ev),
                        Err(_) => break,
                    }
                }
                if out.len() == max {
                    break;
                }
            }
            if !out.is_empty() {
                return out;
            }
            if self.shutdown.load(Ordering::Relaxed) {
                return out;
            }

            let mut select = Select::new();
            for (_, rx) in &self.receivers {
                select.recv(rx);
            }
            // Readiness only; the next drain pass consumes
            let _ = select.ready_timeout(Duration::from_millis(POLL_TIMEOUT_MS as u64));
        }
    }

    /// Shared cancellation token; setting it unblocks `poll` and stops
    /// the workers.
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Stop all worker threads and join them.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                log::error!("worker thread panicked: {e:?}");
            }
        }
        log::info!("poll engine stopped");
    }

    fn node(&self, handle: Handle) -> Result<&SensorNode> {
        self.registry
            .get(handle)
            .filter(|_| self.senders.contains_key(&handle))
            .ok_or_else(|| Error::InvalidArgument(format!("unknown handle {handle}")))
    }

    /// The node's own device, or its first provider's for software nodes.
    fn provider_device<'a>(
        &'a self,
        node: &'a SensorNode,
    ) -> Option<(Handle, &'a crate::iio::DeviceDescriptor)> {
        if let Some(device) = &node.device {
            return Some((node.info.handle, device));
        }
        node.deps.iter().find_map(|&dep| {
            self.registry
                .get(dep)
                .and_then(|n| n.device.as_ref().map(|d| (dep, d)))
        })
    }

    /// Whether the hardware node `provider` is still needed by anyone
    /// other than `requester`.
    fn hardware_in_use(&self, provider: Handle, requester: Handle) -> bool {
        let Some(node) = self.registry.get(provider) else {
            return false;
        };
        if node.state.lock().enabled {
            return true;
        }
        node.dependents.iter().any(|&dependent| {
            dependent != requester
                && self
                    .registry
                    .get(dependent)
                    .is_some_and(|n| n.state.lock().enabled)
        })
    }

    fn inject(&self, event: SensorEvent) {
        let Some(tx) = self.senders.get(&event.handle) else {
            return;
        };
        // Short grace period; the caller drains this pipe itself, so an
        // unbounded blocking send could deadlock it
        if let Err(e) = tx.send_timeout(event, Duration::from_millis(50)) {
            log::warn!("marker for sensor {} dropped: {e}", event.handle);
        }
    }
}

/// Wait for `fd` to become readable; false on timeout or error.
fn wait_readable(fd: RawFd, timeout_ms: i32) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: pfd is a valid pollfd for the duration of the call
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    ret > 0 && (pfd.revents & libc::POLLIN) != 0
}

/// Blocking send with shutdown observation. A full pipe exerts
/// backpressure on the kernel reader instead of dropping.
fn forward(shared: &WorkerShared, handle: Handle, event: SensorEvent) {
    let Some(tx) = shared.senders.get(&handle) else {
        return;
    };
    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }
        match tx.send_timeout(event, Duration::from_millis(50)) {
            Ok(()) => return,
            Err(SendTimeoutError::Timeout(_)) => continue,
            Err(SendTimeoutError::Disconnected(_)) => return,
        }
    }
}

/// Data thread body: read scan records, normalize, fan out.
fn data_worker(shared: &WorkerShared, handle: Handle, dev_node: &Path) {
    let Some(node) = shared.registry.get(handle) else {
        return;
    };
    let Some(device) = &node.device else {
        return;
    };

    let decoder = RecordDecoder::new(device);
    let mut buf = vec![0u8; decoder.record_size()];

    let file = match File::open(dev_node) {
        Ok(file) => file,
        Err(e) => {
            log::error!("\"{}\": open {}: {e}", node.info.name, dev_node.display());
            return;
        }
    };
    let fd = file.as_raw_fd();

    let mut arming = (node.info.kind == SensorKind::Accelerometer).then(MlcArming::new);

    log::debug!("\"{}\": data thread up on {}", node.info.name, dev_node.display());

    while !shared.shutdown.load(Ordering::Relaxed) {
        if !wait_readable(fd, POLL_TIMEOUT_MS) {
            continue;
        }

        match (&file).read(&mut buf) {
            Ok(n) if n == buf.len() => {}
            Ok(0) => {
                // Device removed: terminal for this node
                log::warn!("\"{}\": device gone, thread exiting", node.info.name);
                return;
            }
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                if e.raw_os_error() == Some(libc::ENODEV) {
                    log::warn!("\"{}\": device gone, thread exiting", node.info.name);
                    return;
                }
                // Transient: skip this cycle
                log::debug!("\"{}\": read: {e}", node.info.name);
                continue;
            }
        }

        let Some((values, timestamp_ns)) = decoder.decode(device, &buf) else {
            continue;
        };

        let config = shared.config.get();
        let (rotated, thresholds) =
            normalize_sample(arming.as_mut(), &config, values, timestamp_ns);
        if let Some(thresh) = thresholds {
            program_and_park(shared, node, &threshold_string(&thresh));
        }

        if node.state.lock().enabled {
            forward(
                shared,
                handle,
                SensorEvent {
                    handle,
                    kind: node.info.kind,
                    timestamp_ns,
                    payload: Payload::Vec3(rotated),
                },
            );
        }

        for &dependent in &node.dependents {
            let Some(dep_node) = shared.registry.get(dependent) else {
                continue;
            };
            if !dep_node.state.lock().enabled {
                continue;
            }
            forward(
                shared,
                dependent,
                SensorEvent {
                    handle: dependent,
                    kind: dep_node.info.kind,
                    timestamp_ns,
                    payload: Payload::UncalibratedVec3 {
                        raw: rotated,
                        bias: [0.0; 3],
                    },
                },
            );
        }
    }
}

/// Run the arming hook, then rotate the sample into the vehicle frame for
/// delivery.
///
/// The arming pipeline consumes the unrotated values: the comparator
/// thresholds it derives program registers inside the chip, which compares
/// against its own sensor-frame axes regardless of mounting.
fn normalize_sample(
    arming: Option<&mut MlcArming>,
    config: &HalConfig,
    values: [f32; 3],
    timestamp_ns: i64,
) -> ([f32; 3], Option<Thresholds>) {
    let mut thresholds = None;
    if let Some(arming) = arming {
        arming.set_ignition_off(config.ignition_off);
        thresholds = arming.on_sample(values, timestamp_ns, config.delta_g());
    }
    (apply_rotation(&config.placement.rot, values), thresholds)
}

/// Write classifier thresholds and power down the feeding accelerometer.
fn program_and_park(shared: &WorkerShared, node: &SensorNode, thresholds: &str) {
    log::info!("\"{}\": updating classifier thresholds {}", node.info.name, thresholds);
    if let Err(e) = program_thresholds(&shared.tree, thresholds) {
        log::error!("\"{}\": threshold update failed: {e}", node.info.name);
        return;
    }

    let Some(device) = &node.device else {
        return;
    };
    node.state.lock().enabled = false;
    if let Err(e) = enable_device(&shared.tree, &device.sysfs_path, false) {
        log::error!("\"{}\": disable after arming failed: {e}", node.info.name);
    }
}

/// Event thread body: forward FIFO flush completions as markers.
fn event_worker(shared: &WorkerShared, handle: Handle, dev_node: &Path) {
    let Some(node) = shared.registry.get(handle) else {
        return;
    };
    let fd = match event_fd(dev_node) {
        Ok(fd) => fd,
        Err(e) => {
            log::warn!("\"{}\": no event channel: {e}", node.info.name);
            return;
        }
    };

    log::debug!("\"{}\": event thread up", node.info.name);

    while !shared.shutdown.load(Ordering::Relaxed) {
        if !wait_readable(fd.as_raw_fd(), POLL_TIMEOUT_MS) {
            continue;
        }

        let raw = match read_event(&fd, dev_node) {
            Ok(raw) => raw,
            Err(e) => {
                if e.errno() == -libc::ENODEV {
                    log::warn!("\"{}\": device gone, event thread exiting", node.info.name);
                    return;
                }
                log::debug!("\"{}\": event read: {e}", node.info.name);
                continue;
            }
        };

        if !EventCode(raw.id).is_fifo_flush() {
            continue;
        }

        // Completion belongs to this node and every active consumer
        let marker = |h: Handle, kind| SensorEvent {
            handle: h,
            kind,
            timestamp_ns: raw.timestamp,
            payload: Payload::FlushComplete,
        };
        if node.state.lock().enabled {
            forward(shared, handle, marker(handle, node.info.kind));
        }
        for &dependent in &node.dependents {
            if let Some(dep_node) = shared.registry.get(dependent) {
                if dep_node.state.lock().enabled {
                    forward(shared, dependent, marker(dependent, dep_node.info.kind));
                }
            }
        }
    }
}
