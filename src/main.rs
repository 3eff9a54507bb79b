//! IndriyaHAL daemon entry point
//!
//! Opens the HAL, enables every discovered sensor at a default rate and
//! drains the merged event stream until a shutdown signal arrives,
//! logging periodic throughput stats.

use indriya_hal::config::{AppConfig, ConfigStore, ConfigWatcher};
use indriya_hal::{Hal, Result, SysfsTree};
use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default sampling period: 26 Hz
const DEFAULT_PERIOD_NS: i64 = 38_461_538;

/// Batch up to half a second of samples in the hardware FIFO
const DEFAULT_LATENCY_NS: i64 = 500_000_000;

/// Events drained per poll call
const POLL_BATCH: usize = 64;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `indriya-hal <path>` (positional)
/// - `indriya-hal --config <path>` (flag-based)
/// - `indriya-hal -c <path>` (short flag)
///
/// Defaults to `/etc/indriya-hal.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/indriya-hal.toml".to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("IndriyaHAL v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = parse_config_path();
    let app_config = if Path::new(&config_path).exists() {
        log::info!("Using config: {}", config_path);
        AppConfig::from_file(&config_path)?
    } else {
        log::info!("No config at {}, using defaults", config_path);
        AppConfig::defaults()
    };

    let store = Arc::new(ConfigStore::new());
    let config_dir = Path::new(&app_config.hal.config_dir);
    let _watcher = match ConfigWatcher::spawn(Arc::clone(&store), config_dir) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            // Tunables stay at their defaults without a watcher
            log::warn!("config watcher unavailable: {e}");
            None
        }
    };

    let hal = Hal::open(
        SysfsTree::with_root(&app_config.hal.sysfs_dir),
        Path::new(&app_config.hal.dev_dir),
        Arc::clone(&store),
    )?;

    for sensor in hal.sensors_list() {
        log::info!(
            "sensor {}: \"{}\" range {:.3} resolution {:.6} fifo {}",
            sensor.handle,
            sensor.name,
            sensor.max_range,
            sensor.resolution,
            sensor.fifo_len
        );
        hal.set_rate(sensor.handle, DEFAULT_PERIOD_NS, DEFAULT_LATENCY_NS)?;
        hal.activate(sensor.handle, true)?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    let cancel = hal.cancellation();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
        // Unblocks the poll loop below
        cancel.store(true, Ordering::Relaxed);
    })
    .map_err(|e| indriya_hal::Error::InvalidArgument(format!("ctrl-c handler: {e}")))?;

    let mut total: u64 = 0;
    let mut since_report: u64 = 0;
    let mut last_report = Instant::now();

    while running.load(Ordering::Relaxed) {
        let events = hal.poll(POLL_BATCH);
        total += events.len() as u64;
        since_report += events.len() as u64;

        for event in &events {
            if event.is_flush_complete() {
                log::debug!("sensor {}: flush complete", event.handle);
            }
        }

        if last_report.elapsed() >= Duration::from_secs(10) {
            let rate = since_report as f64 / last_report.elapsed().as_secs_f64();
            log::info!("{total} events total, {rate:.1}/s");
            since_report = 0;
            last_report = Instant::now();
        }
    }

    log::info!("shutting down");
    hal.shutdown();
    Ok(())
}
