//! Discovery and HAL bring-up against a fake sysfs tree

use indriya_hal::config::ConfigStore;
use indriya_hal::iio::device::DeviceDescriptor;
use indriya_hal::iio::ChannelClass;
use indriya_hal::{Hal, SensorKind, SysfsTree};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct FakeDevice<'a> {
    id: u32,
    name: &'a str,
    /// (channel name, type string) pairs
    channels: &'a [(&'a str, &'a str)],
    scale_file: &'a str,
    scale: &'a str,
    scale_available_file: &'a str,
    scales: &'a str,
    frequencies: &'a str,
    /// Some(depth) creates the hardware FIFO files
    fifo: Option<u32>,
}

fn accel_channels() -> &'static [(&'static str, &'static str)] {
    &[
        ("in_accel_x", "le:s16/16>>0"),
        ("in_accel_y", "le:s16/16>>0"),
        ("in_accel_z", "le:s16/16>>0"),
        ("in_timestamp", "le:s64/64>>0"),
    ]
}

fn gyro_channels() -> &'static [(&'static str, &'static str)] {
    &[
        ("in_anglvel_x", "le:s16/16>>0"),
        ("in_anglvel_y", "le:s16/16>>0"),
        ("in_anglvel_z", "le:s16/16>>0"),
        ("in_timestamp", "le:s64/64>>0"),
    ]
}

fn make_device(root: &Path, dev: &FakeDevice) {
    let dir = root.join(format!("iio:device{}", dev.id));
    let scan = dir.join("scan_elements");
    fs::create_dir_all(&scan).unwrap();
    fs::create_dir_all(dir.join("buffer")).unwrap();

    fs::write(dir.join("name"), format!("{}\n", dev.name)).unwrap();
    fs::write(dir.join("buffer/enable"), "0\n").unwrap();
    fs::write(dir.join(dev.scale_file), format!("{}\n", dev.scale)).unwrap();
    fs::write(
        dir.join(dev.scale_available_file),
        format!("{}\n", dev.scales),
    )
    .unwrap();
    fs::write(
        dir.join("sampling_frequency_available"),
        format!("{}\n", dev.frequencies),
    )
    .unwrap();

    for (name, type_str) in dev.channels {
        fs::write(scan.join(format!("{name}_type")), format!("{type_str}\n")).unwrap();
        fs::write(scan.join(format!("{name}_en")), "1\n").unwrap();
    }

    if let Some(depth) = dev.fifo {
        fs::write(dir.join("hwfifo_watermark_max"), format!("{depth}\n")).unwrap();
        fs::write(dir.join("hwfifo_enabled"), "0\n").unwrap();
        fs::write(dir.join("hwfifo_watermark"), "0\n").unwrap();
        fs::write(dir.join("hwfifo_flush"), "0\n").unwrap();
    }
}

fn standard_accel(id: u32, name: &'static str) -> FakeDevice<'static> {
    FakeDevice {
        id,
        name,
        channels: accel_channels(),
        scale_file: "in_accel_x_scale",
        scale: "0.002392",
        scale_available_file: "in_accel_scale_available",
        scales: "0.000598 0.001196 0.002392 0.004784",
        frequencies: "12.5 26 52 104 208",
        fifo: Some(256),
    }
}

fn standard_gyro(id: u32, name: &'static str) -> FakeDevice<'static> {
    FakeDevice {
        id,
        name,
        channels: gyro_channels(),
        scale_file: "in_anglvel_x_scale",
        scale: "0.000153",
        scale_available_file: "in_anglvel_scale_available",
        scales: "0.000153 0.000305 0.000611 0.001222",
        frequencies: "12.5 26 52 104 208",
        fifo: Some(256),
    }
}

#[test]
fn full_scale_selection_prefers_smallest_covering_scale() {
    let tmp = TempDir::new().unwrap();
    make_device(
        tmp.path(),
        &FakeDevice {
            channels: &[("in_accel_x", "le:s24/32>>0"), ("in_timestamp", "le:s64/64>>0")],
            scales: "0.000488 0.000976",
            frequencies: "52 104 208",
            ..standard_accel(0, "asm330lhh_accel")
        },
    );
    let tree = SysfsTree::with_root(tmp.path());

    // 0.000488 * (2^23 - 1) ~= 4093 covers the requested 4000
    let desc = DeviceDescriptor::discover(
        &tree,
        "asm330lhh_accel",
        &["in_accel_x", "in_timestamp"],
        ChannelClass::Accel,
        Some(4000.0),
        0.01,
    )
    .unwrap();

    assert!((desc.resolution() - 0.000488).abs() < 1e-7);
    let written = fs::read_to_string(tmp.path().join("iio:device0/in_accel_x_scale")).unwrap();
    assert!((written.trim().parse::<f32>().unwrap() - 0.000488).abs() < 1e-7);
    assert_eq!(desc.fifo_len, 256);
}

#[test]
fn full_scale_falls_back_to_coarsest() {
    let tmp = TempDir::new().unwrap();
    make_device(tmp.path(), &standard_accel(0, "asm330lhh_accel"));
    let tree = SysfsTree::with_root(tmp.path());

    // No 16-bit scale covers 1e6; the coarsest entry is programmed
    let desc = DeviceDescriptor::discover(
        &tree,
        "asm330lhh_accel",
        &["in_accel_x", "in_accel_y", "in_accel_z", "in_timestamp"],
        ChannelClass::Accel,
        Some(1e6),
        0.01,
    )
    .unwrap();

    assert!((desc.resolution() - 0.004784).abs() < 1e-7);
}

#[test]
fn discovery_quiesces_the_device() {
    let tmp = TempDir::new().unwrap();
    make_device(tmp.path(), &standard_accel(3, "asm330lhh_accel"));
    let tree = SysfsTree::with_root(tmp.path());

    DeviceDescriptor::discover(
        &tree,
        "asm330lhh_accel",
        &["in_accel_x", "in_accel_y", "in_accel_z", "in_timestamp"],
        ChannelClass::Accel,
        None,
        0.01,
    )
    .unwrap();

    let dir = tmp.path().join("iio:device3");
    assert_eq!(
        fs::read_to_string(dir.join("scan_elements/in_accel_x_en")).unwrap(),
        "0"
    );
    assert_eq!(fs::read_to_string(dir.join("buffer/enable")).unwrap(), "0");
    // FIFO setup sized the kernel buffer at twice the FIFO depth
    assert_eq!(fs::read_to_string(dir.join("buffer/length")).unwrap(), "512");
    assert_eq!(fs::read_to_string(dir.join("hwfifo_enabled")).unwrap(), "1");
}

#[test]
fn hal_builds_graph_and_inherits_virtual_info() {
    let tmp = TempDir::new().unwrap();
    make_device(tmp.path(), &standard_accel(0, "asm330lhh_accel"));
    make_device(tmp.path(), &standard_gyro(1, "asm330lhh_gyro"));
    let dev_dir = TempDir::new().unwrap();

    let hal = Hal::open(
        SysfsTree::with_root(tmp.path()),
        dev_dir.path(),
        Arc::new(ConfigStore::new()),
    )
    .unwrap();

    let sensors = hal.sensors_list();
    assert_eq!(sensors.len(), 4);

    let accel = sensors
        .iter()
        .find(|s| s.kind == SensorKind::Accelerometer)
        .unwrap();
    let accel_uncal = sensors
        .iter()
        .find(|s| s.kind == SensorKind::AccelerometerUncalibrated)
        .unwrap();
    assert!(accel.max_range > 0.0);
    assert_eq!(accel_uncal.max_range, accel.max_range);
    assert_eq!(accel_uncal.resolution, accel.resolution);
    assert_eq!(accel_uncal.fifo_len, accel.fifo_len);

    hal.shutdown();
}

#[test]
fn broken_device_is_skipped_not_fatal() {
    let tmp = TempDir::new().unwrap();
    // Accelerometer missing its scale-availability table
    let broken = tmp.path().join("iio:device0");
    fs::create_dir_all(broken.join("scan_elements")).unwrap();
    fs::create_dir_all(broken.join("buffer")).unwrap();
    fs::write(broken.join("name"), "asm330lhh_accel\n").unwrap();
    fs::write(broken.join("in_accel_x_scale"), "0.002392\n").unwrap();
    fs::write(broken.join("sampling_frequency_available"), "26 52\n").unwrap();
    for (name, type_str) in accel_channels() {
        fs::write(
            broken.join(format!("scan_elements/{name}_type")),
            format!("{type_str}\n"),
        )
        .unwrap();
        fs::write(broken.join(format!("scan_elements/{name}_en")), "1\n").unwrap();
    }
    make_device(tmp.path(), &standard_gyro(1, "asm330lhh_gyro"));
    let dev_dir = TempDir::new().unwrap();

    let hal = Hal::open(
        SysfsTree::with_root(tmp.path()),
        dev_dir.path(),
        Arc::new(ConfigStore::new()),
    )
    .unwrap();

    // Gyro plus its uncalibrated shadow; nothing accelerometer-flavored
    let sensors = hal.sensors_list();
    assert_eq!(sensors.len(), 2);
    assert!(sensors.iter().all(|s| !matches!(
        s.kind,
        SensorKind::Accelerometer | SensorKind::AccelerometerUncalibrated
    )));

    hal.shutdown();
}

#[test]
fn set_rate_programs_frequency_and_watermark() {
    let tmp = TempDir::new().unwrap();
    make_device(tmp.path(), &standard_accel(0, "asm330lhh_accel"));
    make_device(tmp.path(), &standard_gyro(1, "asm330lhh_gyro"));
    let dev_dir = TempDir::new().unwrap();

    let hal = Hal::open(
        SysfsTree::with_root(tmp.path()),
        dev_dir.path(),
        Arc::new(ConfigStore::new()),
    )
    .unwrap();

    let accel = hal
        .sensors_list()
        .into_iter()
        .find(|s| s.kind == SensorKind::Accelerometer)
        .unwrap();

    // 100 Hz requested: the table (12.5 26 52 104 208) rounds up to 104;
    // 500 ms of latency at 10 ms per sample is a 50-sample watermark
    hal.set_rate(accel.handle, 10_000_000, 500_000_000).unwrap();

    let dir = tmp.path().join("iio:device0");
    assert_eq!(
        fs::read_to_string(dir.join("sampling_frequency")).unwrap(),
        "104"
    );
    assert_eq!(
        fs::read_to_string(dir.join("hwfifo_watermark")).unwrap(),
        "50"
    );

    hal.shutdown();
}

#[test]
fn flush_writes_the_device_fifo_flush_attribute() {
    let tmp = TempDir::new().unwrap();
    make_device(tmp.path(), &standard_accel(0, "asm330lhh_accel"));
    make_device(tmp.path(), &standard_gyro(1, "asm330lhh_gyro"));
    let dev_dir = TempDir::new().unwrap();

    let hal = Hal::open(
        SysfsTree::with_root(tmp.path()),
        dev_dir.path(),
        Arc::new(ConfigStore::new()),
    )
    .unwrap();

    let accel = hal
        .sensors_list()
        .into_iter()
        .find(|s| s.kind == SensorKind::Accelerometer)
        .unwrap();
    hal.activate(accel.handle, true).unwrap();
    hal.flush(accel.handle).unwrap();

    // The flush request lands on the device-level attribute
    let dir = tmp.path().join("iio:device0");
    assert_eq!(fs::read_to_string(dir.join("hwfifo_flush")).unwrap(), "1");

    hal.shutdown();
}

#[test]
fn activation_toggles_kernel_channels() {
    let tmp = TempDir::new().unwrap();
    make_device(tmp.path(), &standard_accel(0, "asm330lhh_accel"));
    make_device(tmp.path(), &standard_gyro(1, "asm330lhh_gyro"));
    let dev_dir = TempDir::new().unwrap();

    let hal = Hal::open(
        SysfsTree::with_root(tmp.path()),
        dev_dir.path(),
        Arc::new(ConfigStore::new()),
    )
    .unwrap();

    let gyro = hal
        .sensors_list()
        .into_iter()
        .find(|s| s.kind == SensorKind::Gyroscope)
        .unwrap();

    hal.activate(gyro.handle, true).unwrap();
    let dir = tmp.path().join("iio:device1");
    assert_eq!(
        fs::read_to_string(dir.join("scan_elements/in_anglvel_x_en")).unwrap(),
        "1"
    );
    assert_eq!(fs::read_to_string(dir.join("buffer/enable")).unwrap(), "1");

    hal.activate(gyro.handle, false).unwrap();
    assert_eq!(fs::read_to_string(dir.join("buffer/enable")).unwrap(), "0");

    hal.shutdown();
}
