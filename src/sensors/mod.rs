//! Sensor kinds, nodes and the handle registry
//!
//! Sensor kinds form a closed sum type; nodes live in an arena owned by
//! [`SensorRegistry`] and are referenced everywhere by dense 1-based
//! handles, never by pointer. Handle 0 is reserved/invalid.

pub mod graph;

use crate::iio::DeviceDescriptor;
use parking_lot::Mutex;

/// Stable 1-based sensor identifier
pub type Handle = u32;

/// Reserved invalid handle
pub const INVALID_HANDLE: Handle = 0;

/// Maximum dependency slots per node
pub const MAX_DEPENDENCIES: usize = 4;

/// Closed set of supported sensor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    /// Software sensor emitting raw accel plus bias estimate
    AccelerometerUncalibrated,
    /// Software sensor emitting raw gyro plus bias estimate
    GyroscopeUncalibrated,
}

impl SensorKind {
    /// Kinds this sensor consumes, in slot order.
    pub fn dependencies(self) -> &'static [SensorKind] {
        match self {
            SensorKind::Accelerometer | SensorKind::Gyroscope => &[],
            SensorKind::AccelerometerUncalibrated => &[SensorKind::Accelerometer],
            SensorKind::GyroscopeUncalibrated => &[SensorKind::Gyroscope],
        }
    }

    /// Whether this kind is backed by an IIO device
    pub fn is_hardware(self) -> bool {
        matches!(self, SensorKind::Accelerometer | SensorKind::Gyroscope)
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Gyroscope => "gyroscope",
            SensorKind::AccelerometerUncalibrated => "accelerometer-uncalibrated",
            SensorKind::GyroscopeUncalibrated => "gyroscope-uncalibrated",
        };
        f.write_str(s)
    }
}

/// Caller-visible sensor description, one entry of the sensors list.
#[derive(Debug, Clone)]
pub struct SensorInfo {
    pub handle: Handle,
    pub kind: SensorKind,
    pub name: String,
    /// Maximum physical range at the programmed scale
    pub max_range: f32,
    /// Physical value of one LSB
    pub resolution: f32,
    /// Power consumption in mA
    pub power_ma: f32,
    /// Hardware FIFO depth in samples, 0 when absent
    pub fifo_len: u32,
    /// Wake-up capable
    pub wake_up: bool,
}

/// Mutable activation state, adjusted by the caller-facing ABI.
#[derive(Debug, Clone, Default)]
pub struct NodeState {
    pub enabled: bool,
    pub period_ns: i64,
    pub max_latency_ns: i64,
}

/// One sensor entity: hardware-backed or software/virtual.
#[derive(Debug)]
pub struct SensorNode {
    pub info: SensorInfo,
    /// Backing device; `None` for software sensors
    pub device: Option<DeviceDescriptor>,
    /// Activation and rate state
    pub state: Mutex<NodeState>,
    /// Wired dependency handles, slot order; filled by the graph builder
    pub deps: Vec<Handle>,
    /// Handles of nodes consuming this node's output
    pub dependents: Vec<Handle>,
}

impl SensorNode {
    /// Hardware node built from a discovered device.
    pub fn hardware(handle: Handle, kind: SensorKind, name: &str, device: DeviceDescriptor) -> Self {
        Self {
            info: SensorInfo {
                handle,
                kind,
                name: name.to_string(),
                max_range: device.max_range(),
                resolution: device.resolution(),
                power_ma: device.power_ma,
                fifo_len: device.fifo_len,
                wake_up: device.wake_up,
            },
            device: Some(device),
            state: Mutex::new(NodeState::default()),
            deps: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// Software node; range/resolution are inherited later from the wired
    /// dependency.
    pub fn software(handle: Handle, kind: SensorKind, name: &str) -> Self {
        Self {
            info: SensorInfo {
                handle,
                kind,
                name: name.to_string(),
                max_range: 0.0,
                resolution: 0.0,
                power_ma: 0.0,
                fifo_len: 0,
                wake_up: false,
            },
            device: None,
            state: Mutex::new(NodeState::default()),
            deps: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// Whether the node produces data records to be read from the kernel
    pub fn has_data_channel(&self) -> bool {
        self.device.is_some()
    }

    /// Whether the node owns an IIO event channel (FIFO notifications)
    pub fn has_event_channel(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.fifo_len > 0)
    }
}

/// Arena of sensor nodes; handles are `index + 1`.
#[derive(Debug, Default)]
pub struct SensorRegistry {
    nodes: Vec<SensorNode>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the next inserted node will receive
    pub fn next_handle(&self) -> Handle {
        self.nodes.len() as Handle + 1
    }

    /// Insert a node, returning its handle.
    pub fn insert(&mut self, node: SensorNode) -> Handle {
        debug_assert_eq!(node.info.handle, self.next_handle());
        self.nodes.push(node);
        self.nodes.len() as Handle
    }

    pub fn get(&self, handle: Handle) -> Option<&SensorNode> {
        handle
            .checked_sub(1)
            .and_then(|i| self.nodes.get(i as usize))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut SensorNode> {
        handle
            .checked_sub(1)
            .and_then(|i| self.nodes.get_mut(i as usize))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in handle order
    pub fn iter(&self) -> impl Iterator<Item = &SensorNode> {
        self.nodes.iter()
    }

    /// Handles in insertion (discovery) order
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        1..=self.nodes.len() as Handle
    }
}
