//! IIO device discovery
//!
//! Populates a [`DeviceDescriptor`] from the sysfs tree: channel bit
//! layouts, the sampling-frequency and scale tables, full-scale selection
//! and hardware-FIFO setup. Discovery is independent per device; a failure
//! here never aborts discovery of other devices.

use crate::error::{Error, Result};
use crate::iio::channel::{Channel, ChannelLayout};
use crate::iio::ChannelClass;
use crate::sysfs::SysfsTree;
use std::path::{Path, PathBuf};

/// Upper bound on scan elements per device
pub const MAX_CHANNELS: usize = 8;

/// Per-device metadata, immutable after discovery.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Sysfs directory of the device
    pub sysfs_path: PathBuf,
    /// Kernel driver name (content of the `name` file)
    pub name: String,
    /// Numeric id N of `iio:deviceN`
    pub id: u32,
    /// Channel class of the data scan elements
    pub class: ChannelClass,
    /// Scan elements in declaration order, timestamp last
    pub channels: Vec<Channel>,
    /// Available sampling frequencies, file order (ascending)
    pub sampling_frequencies: Vec<f32>,
    /// Available scales, file order (fine to coarse)
    pub scales: Vec<f32>,
    /// Hardware FIFO depth in samples, 0 when absent
    pub fifo_len: u32,
    /// Power consumption in mA
    pub power_ma: f32,
    /// Wake-up capable
    pub wake_up: bool,
}

impl DeviceDescriptor {
    /// Discover a device by driver name and populate its metadata.
    ///
    /// `full_scale` is the requested maximum physical range; when given, the
    /// smallest available scale whose representable maximum covers it is
    /// selected and programmed back to the hardware (coarsest scale when
    /// none qualifies).
    pub fn discover(
        tree: &SysfsTree,
        driver_name: &str,
        channel_names: &[&str],
        class: ChannelClass,
        full_scale: Option<f32>,
        power_ma: f32,
    ) -> Result<Self> {
        if channel_names.len() > MAX_CHANNELS {
            return Err(Error::Discovery {
                device: driver_name.to_string(),
                reason: format!("{} channels exceed the maximum", channel_names.len()),
            });
        }

        let id = tree.device_by_name(driver_name)?;
        let dir = tree.device_dir(id);

        let mut channels = Vec::with_capacity(channel_names.len());
        for (index, name) in channel_names.iter().enumerate() {
            let type_path = dir.join("scan_elements").join(format!("{name}_type"));
            let layout = ChannelLayout::parse(&tree.read_str(&type_path)?)?;

            // All data channels share one scale file; the timestamp channel
            // has no scale in hardware.
            let scale = if name.ends_with("timestamp") {
                1.0
            } else {
                tree.read_float(&dir.join(class.scale_file()))?
            };

            channels.push(Channel {
                name: name.to_string(),
                layout,
                scale,
                offset: 0.0,
                index,
            });
        }

        // Quiesce the device before touching its configuration, avoiding
        // reads of partially-programmed state.
        enable_device(tree, &dir, false)?;

        let sampling_frequencies =
            tree.read_float_list(&dir.join("sampling_frequency_available"))?;
        if sampling_frequencies.is_empty() {
            return Err(Error::Discovery {
                device: driver_name.to_string(),
                reason: "empty sampling frequency table".into(),
            });
        }

        let scales = tree.read_float_list(&dir.join(class.scale_available_file()))?;
        if scales.is_empty() {
            return Err(Error::Discovery {
                device: driver_name.to_string(),
                reason: "empty scale table".into(),
            });
        }

        let mut desc = Self {
            sysfs_path: dir,
            name: driver_name.to_string(),
            id,
            class,
            channels,
            sampling_frequencies,
            scales,
            fifo_len: 0,
            power_ma,
            wake_up: false,
        };

        if let Some(range) = full_scale {
            desc.select_full_scale(tree, range)?;
        }

        desc.fifo_len = setup_hw_fifo(tree, &desc.sysfs_path);

        // Prefer the monotonic clock domain when the driver exposes the knob
        let clock = desc.sysfs_path.join("current_timestamp_clock");
        if tree.exists(&clock) {
            if let Err(e) = tree.write_str(&clock, "monotonic") {
                log::warn!("\"{driver_name}\": failed to set timestamp clock: {e}");
            }
        }

        Ok(desc)
    }

    /// Pick and program the scale covering `range`.
    ///
    /// Scans the available table in order for the first (smallest) scale
    /// whose representable maximum reaches the requested range, falling back
    /// to the coarsest entry.
    fn select_full_scale(&mut self, tree: &SysfsTree, range: f32) -> Result<()> {
        let layout = self.channels[0].layout;
        let max_code: f64 = if layout.signed {
            2f64.powi(layout.bits_used as i32 - 1) - 1.0
        } else {
            2f64.powi(layout.bits_used as i32) - 1.0
        };

        let chosen = self
            .scales
            .iter()
            .copied()
            .find(|s| f64::from(*s) * max_code >= f64::from(range))
            .unwrap_or(*self.scales.last().unwrap_or(&0.0));

        tree.write_float(&self.sysfs_path.join(self.class.scale_file()), chosen)?;

        for ch in self.channels.iter_mut().filter(|c| !c.is_timestamp()) {
            ch.scale = chosen;
        }

        log::debug!(
            "\"{}\": full scale {chosen} selected for range {range}",
            self.name
        );
        Ok(())
    }

    /// Resolution of the data channels (scale of the first channel)
    pub fn resolution(&self) -> f32 {
        self.channels[0].scale
    }

    /// Maximum representable physical value at the programmed scale
    pub fn max_range(&self) -> f32 {
        let layout = self.channels[0].layout;
        self.resolution() * (2f32.powi(layout.bits_used as i32 - 1) - 1.0)
    }

    /// Size in bytes of one scan record, channels at natural alignment.
    pub fn record_size(&self) -> usize {
        let mut offset = 0usize;
        for ch in &self.channels {
            let bytes = ch.layout.bytes as usize;
            offset = offset.div_ceil(bytes) * bytes + bytes;
        }
        offset
    }

    /// Byte offset of each channel inside one scan record.
    pub fn channel_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.channels.len());
        let mut offset = 0usize;
        for ch in &self.channels {
            let bytes = ch.layout.bytes as usize;
            offset = offset.div_ceil(bytes) * bytes;
            offsets.push(offset);
            offset += bytes;
        }
        offsets
    }
}

/// Enable or disable a device: every `scan_elements/*_en` plus
/// `buffer/enable`.
pub fn enable_device(tree: &SysfsTree, dir: &Path, enable: bool) -> Result<()> {
    let scan_dir = dir.join("scan_elements");
    for entry in tree.list_entries(&scan_dir)? {
        if entry.ends_with("_en") {
            tree.write_int(&scan_dir.join(&entry), i64::from(enable))?;
        }
    }
    tree.write_int(&dir.join("buffer/enable"), i64::from(enable))
}

/// Read the hardware FIFO depth and program the kernel buffer around it.
///
/// Reads `hwfifo_watermark_max`, sizes `buffer/length` at twice the FIFO and
/// turns on `hwfifo_enabled` where the file exists. Any failure degrades to
/// "no FIFO" rather than failing discovery.
fn setup_hw_fifo(tree: &SysfsTree, dir: &Path) -> u32 {
    let len = match tree.read_int(&dir.join("hwfifo_watermark_max")) {
        Ok(len) if len > 0 => len as u32,
        _ => return 0,
    };

    if let Err(e) = tree.write_int(&dir.join("buffer/length"), i64::from(len) * 2) {
        log::warn!("failed to size kernel buffer: {e}");
        return len;
    }

    let enabled = dir.join("hwfifo_enabled");
    if tree.exists(&enabled) {
        if let Err(e) = tree.write_int(&enabled, 1) {
            log::warn!("failed to enable hw fifo: {e}");
        }
    }

    len
}
