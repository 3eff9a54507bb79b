//! Error types for the IIO HAL

use std::path::Path;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// HAL error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Sysfs or character-device I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File the operation was issued against
        path: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Device or sensor lookup miss
    #[error("not found: {0}")]
    NotFound(String),

    /// Channel/scale/frequency population failure during discovery
    #[error("discovery failed for \"{device}\": {reason}")]
    Discovery {
        /// IIO driver name of the device
        device: String,
        /// What went wrong
        reason: String,
    },

    /// Graph wiring failure for one node
    #[error("\"{sensor}\": unsatisfied dependency on {dependency}")]
    DependencyUnsatisfied {
        /// Name of the node that could not be wired
        sensor: String,
        /// Required sensor kind, human readable
        dependency: String,
    },

    /// Out-of-range handle, unsupported device type, malformed value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unparseable sysfs content
    #[error("parse error in {path}: {what}")]
    Parse {
        /// File whose content failed to parse
        path: String,
        /// Description of the malformed content
        what: String,
    },
}

impl Error {
    /// Build an I/O error tagged with the file it happened on.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Error::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Negated OS error code, matching the fixed consumer ABI which reports
    /// `-errno` style integers. Non-I/O errors map to `-EINVAL`.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Io { source, .. } => -source.raw_os_error().unwrap_or(libc::EIO),
            Error::NotFound(_) => -libc::ENODEV,
            _ => -libc::EINVAL,
        }
    }
}
