//! IIO event channel: event fd ioctl and event-code unpacking
//!
//! Event-capable devices expose a secondary descriptor obtained with
//! `IIO_GET_EVENT_FD_IOCTL` on `/dev/iio:deviceN`; it delivers fixed-layout
//! records of a packed 64-bit event code plus a timestamp.

use crate::error::{Error, Result};
use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

/// `_IOR('i', 0x90, int)`
pub const IIO_GET_EVENT_FD_IOCTL: libc::c_ulong = 0x8004_6990;

/// FIFO flush event direction field
pub const EV_DIR_FIFO_DATA: u8 = 0x05;
/// FIFO flush event type field
pub const EV_TYPE_FIFO_FLUSH: u8 = 0x06;

/// Fixed-layout kernel event record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct RawEvent {
    /// Packed event code, see [`EventCode`]
    pub id: u64,
    /// Event timestamp in nanoseconds
    pub timestamp: i64,
}

/// Packed 64-bit IIO event code.
///
/// Field offsets: type at 56, direction at 48, channel type at 32,
/// channel2 at 16, modifier at 40, differential flag at 55, channel at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCode(pub u64);

impl EventCode {
    /// Event type field
    pub fn ev_type(self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// Direction field (bit 55 is the differential flag, masked out)
    pub fn direction(self) -> u8 {
        ((self.0 >> 48) & 0x7F) as u8
    }

    /// Channel type field
    pub fn chan_type(self) -> u8 {
        (self.0 >> 32) as u8
    }

    /// Modifier field
    pub fn modifier(self) -> u8 {
        (self.0 >> 40) as u8
    }

    /// Second channel number
    pub fn channel2(self) -> i16 {
        (self.0 >> 16) as i16
    }

    /// Channel number
    pub fn channel(self) -> i16 {
        self.0 as i16
    }

    /// Differential flag
    pub fn differential(self) -> bool {
        self.0 & (1 << 55) != 0
    }

    /// Whether this code signals a hardware FIFO flush completion
    pub fn is_fifo_flush(self) -> bool {
        self.ev_type() == EV_TYPE_FIFO_FLUSH && self.direction() == EV_DIR_FIFO_DATA
    }

    #[cfg(test)]
    pub(crate) fn pack(ev_type: u8, direction: u8, chan_type: u8, channel: i16) -> Self {
        EventCode(
            (u64::from(ev_type) << 56)
                | (u64::from(direction & 0x7F) << 48)
                | (u64::from(chan_type) << 32)
                | (channel as u16 as u64),
        )
    }
}

/// Obtain the event file descriptor of a device node.
pub fn event_fd(dev_node: &Path) -> Result<OwnedFd> {
    let file = File::open(dev_node).map_err(|e| Error::io(dev_node, e))?;

    let mut fd: libc::c_int = -1;
    // SAFETY: the ioctl writes a single int through a valid pointer
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), IIO_GET_EVENT_FD_IOCTL, &mut fd) };
    if ret < 0 || fd < 0 {
        return Err(Error::io(dev_node, std::io::Error::last_os_error()));
    }

    // SAFETY: the kernel just handed us ownership of this descriptor
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Read one event record from the event fd. Blocks until one arrives.
pub fn read_event(fd: &OwnedFd, dev_node: &Path) -> Result<RawEvent> {
    let mut buf = [0u8; 16];
    // SAFETY: buf is a valid 16-byte buffer for the duration of the call
    let n = unsafe {
        libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr().cast::<libc::c_void>(),
            buf.len(),
        )
    };
    if n != buf.len() as isize {
        return Err(Error::io(dev_node, std::io::Error::last_os_error()));
    }

    Ok(RawEvent {
        id: u64::from_le_bytes(buf[0..8].try_into().expect("slice of 8")),
        timestamp: i64::from_le_bytes(buf[8..16].try_into().expect("slice of 8")),
    })
}
