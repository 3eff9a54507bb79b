//! Scalar sysfs access and IIO device lookup
//!
//! Every operation is open-read/write-close with no retry; a failure is
//! reported to the caller with the path and OS error attached and never
//! escalates past this boundary.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory entry prefix of IIO devices, e.g. `iio:device3`
pub const IIO_DEVICE_PREFIX: &str = "iio:device";

/// Default sysfs directory holding the IIO devices
pub const DEFAULT_IIO_DIR: &str = "/sys/bus/iio/devices";

/// Accessor for a sysfs tree.
///
/// The root is configurable so tests (and bench setups) can point it at a
/// fake tree instead of `/sys`.
#[derive(Debug, Clone)]
pub struct SysfsTree {
    root: PathBuf,
}

impl SysfsTree {
    /// Accessor rooted at `/sys/bus/iio/devices`
    pub fn new() -> Self {
        Self::with_root(DEFAULT_IIO_DIR)
    }

    /// Accessor rooted at an arbitrary directory
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory of the tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sysfs directory of an IIO device, `<root>/iio:device<id>`
    pub fn device_dir(&self, id: u32) -> PathBuf {
        self.root.join(format!("{IIO_DEVICE_PREFIX}{id}"))
    }

    /// Read a whole file as a trimmed string
    pub fn read_str(&self, path: &Path) -> Result<String> {
        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(raw.trim().to_string())
    }

    /// Read a file containing a single integer
    pub fn read_int(&self, path: &Path) -> Result<i64> {
        let raw = self.read_str(path)?;
        raw.parse::<i64>().map_err(|_| Error::Parse {
            path: path.display().to_string(),
            what: format!("expected integer, got {raw:?}"),
        })
    }

    /// Read a file containing a single float
    pub fn read_float(&self, path: &Path) -> Result<f32> {
        let raw = self.read_str(path)?;
        raw.parse::<f32>().map_err(|_| Error::Parse {
            path: path.display().to_string(),
            what: format!("expected float, got {raw:?}"),
        })
    }

    /// Read a space- or comma-separated float list, in file order.
    ///
    /// Unparseable tokens are skipped, matching the tolerant scan of the
    /// frequency/scale availability files.
    pub fn read_float_list(&self, path: &Path) -> Result<Vec<f32>> {
        let raw = self.read_str(path)?;
        Ok(raw
            .split([' ', ','])
            .filter(|tok| !tok.is_empty())
            .filter_map(|tok| tok.parse::<f32>().ok())
            .collect())
    }

    /// Write an integer
    pub fn write_int(&self, path: &Path, val: i64) -> Result<()> {
        fs::write(path, format!("{val}")).map_err(|e| Error::io(path, e))
    }

    /// Write a float with the `%f` format the kernel drivers parse
    pub fn write_float(&self, path: &Path, val: f32) -> Result<()> {
        fs::write(path, format!("{val:.6}")).map_err(|e| Error::io(path, e))
    }

    /// Write a raw string
    pub fn write_str(&self, path: &Path, val: &str) -> Result<()> {
        fs::write(path, val).map_err(|e| Error::io(path, e))
    }

    /// Whether a file exists (old-kernel compatibility probes)
    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Entry names of a directory, sorted for deterministic scans
    pub fn list_entries(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
            let entry = entry.map_err(|e| Error::io(dir, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Find an IIO device whose `name` file matches `name` exactly.
    ///
    /// Scans `<root>` for `iio:deviceN` entries; first match wins.
    pub fn device_by_name(&self, name: &str) -> Result<u32> {
        self.scan_devices(|dev_name| dev_name == name)?
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Find an IIO device whose `name` file ends with `type_suffix`.
    ///
    /// Used to locate the MLC device (`*_mlc`); first match wins.
    pub fn device_by_type(&self, type_suffix: &str) -> Result<u32> {
        self.scan_devices(|dev_name| dev_name.ends_with(type_suffix))?
            .ok_or_else(|| Error::NotFound(type_suffix.to_string()))
    }

    fn scan_devices<F: Fn(&str) -> bool>(&self, matches: F) -> Result<Option<u32>> {
        for entry in self.list_entries(&self.root)? {
            let Some(num) = entry.strip_prefix(IIO_DEVICE_PREFIX) else {
                continue;
            };
            let Ok(id) = num.parse::<u32>() else {
                continue;
            };

            // Unreadable name files are skipped, not fatal to the scan
            let name_path = self.device_dir(id).join("name");
            let Ok(dev_name) = self.read_str(&name_path) else {
                continue;
            };

            if matches(&dev_name) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }
}

impl Default for SysfsTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_tree() -> (tempfile::TempDir, SysfsTree) {
        let dir = tempfile::tempdir().unwrap();
        let tree = SysfsTree::with_root(dir.path());
        (dir, tree)
    }

    #[test]
    fn int_round_trip() {
        let (dir, tree) = fake_tree();
        let path = dir.path().join("value");

        for n in [0i64, -1, -32768, 52, 104208] {
            tree.write_int(&path, n).unwrap();
            assert_eq!(tree.read_int(&path).unwrap(), n);
        }
    }

    #[test]
    fn float_list_accepts_space_and_comma() {
        let (dir, tree) = fake_tree();
        let path = dir.path().join("sampling_frequency_available");

        fs::write(&path, "12.5 26, 52 104\n").unwrap();
        assert_eq!(
            tree.read_float_list(&path).unwrap(),
            vec![12.5, 26.0, 52.0, 104.0]
        );
    }

    #[test]
    fn device_lookup_by_name_and_type() {
        let (dir, tree) = fake_tree();
        for (id, name) in [(0, "asm330lhh_accel"), (1, "asm330lhh_gyro"), (2, "asm330lhhx_mlc")] {
            let dev = dir.path().join(format!("iio:device{id}"));
            fs::create_dir(&dev).unwrap();
            fs::write(dev.join("name"), format!("{name}\n")).unwrap();
        }

        assert_eq!(tree.device_by_name("asm330lhh_gyro").unwrap(), 1);
        assert_eq!(tree.device_by_type("mlc").unwrap(), 2);
        assert!(matches!(
            tree.device_by_name("asm330lhh"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn read_reports_path_on_error() {
        let (_dir, tree) = fake_tree();
        let err = tree.read_int(Path::new("/nonexistent/value")).unwrap_err();
        assert_eq!(err.errno(), -libc::ENOENT);
    }
}
