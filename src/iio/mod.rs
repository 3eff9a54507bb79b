//! Linux IIO device metadata and kernel interfaces

pub mod channel;
pub mod device;
pub mod event;

pub use channel::{Channel, ChannelLayout};
pub use device::DeviceDescriptor;

/// Kernel channel class, selects the per-class sysfs file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    /// `in_accel_*` channels
    Accel,
    /// `in_anglvel_*` channels
    AngVel,
    /// `in_temp_*` channels
    Temp,
}

impl ChannelClass {
    /// Shared scale file for the class (all axes share one scale)
    pub fn scale_file(self) -> &'static str {
        match self {
            ChannelClass::Accel => "in_accel_x_scale",
            ChannelClass::AngVel => "in_anglvel_x_scale",
            ChannelClass::Temp => "in_temp_scale",
        }
    }

    /// Scale availability file for the class
    pub fn scale_available_file(self) -> &'static str {
        match self {
            ChannelClass::Accel => "in_accel_scale_available",
            ChannelClass::AngVel => "in_anglvel_scale_available",
            ChannelClass::Temp => "in_temp_scale_available",
        }
    }
}
