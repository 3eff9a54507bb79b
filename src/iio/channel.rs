//! Scan-element bit layout parsing and raw sample extraction
//!
//! The kernel describes each scan element in a `_type` file with the format
//! `{b|l}e:{s|u}<bits>/<storagebits>>><shift>`, e.g. `le:s16/16>>0`.

use crate::error::{Error, Result};

/// Bit layout of one scan element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    /// Big endian storage
    pub big_endian: bool,
    /// Two's-complement signed value
    pub signed: bool,
    /// Significant bits
    pub bits_used: u32,
    /// Storage size in bytes
    pub bytes: u32,
    /// Right shift to apply to the stored word
    pub shift: u32,
}

impl ChannelLayout {
    /// Parse a `_type` string.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = |what: &str| Error::Parse {
            path: String::new(),
            what: format!("channel type {s:?}: {what}"),
        };

        let (endian, rest) = s.split_once("e:").ok_or_else(|| malformed("missing endianness"))?;
        let big_endian = match endian {
            "b" => true,
            "l" => false,
            _ => return Err(malformed("bad endianness")),
        };

        let mut chars = rest.chars();
        let signed = match chars.next() {
            Some('s') => true,
            Some('u') => false,
            _ => return Err(malformed("bad sign")),
        };

        let rest = chars.as_str();
        let (bits, rest) = rest.split_once('/').ok_or_else(|| malformed("missing storage bits"))?;
        let (storage, shift) = rest.split_once(">>").ok_or_else(|| malformed("missing shift"))?;

        let bits_used: u32 = bits.parse().map_err(|_| malformed("bad bits"))?;
        let storage_bits: u32 = storage.parse().map_err(|_| malformed("bad storage bits"))?;
        let shift: u32 = shift.parse().map_err(|_| malformed("bad shift"))?;

        if bits_used == 0 || bits_used > 64 || storage_bits < bits_used || storage_bits % 8 != 0 {
            return Err(malformed("inconsistent bit widths"));
        }

        Ok(Self {
            big_endian,
            signed,
            bits_used,
            bytes: storage_bits / 8,
            shift,
        })
    }

    /// Re-encode in the kernel's `_type` format.
    pub fn encode(&self) -> String {
        format!(
            "{}e:{}{}/{}>>{}",
            if self.big_endian { 'b' } else { 'l' },
            if self.signed { 's' } else { 'u' },
            self.bits_used,
            self.bytes * 8,
            self.shift
        )
    }

    /// Value mask over the significant bits
    pub fn mask(&self) -> u64 {
        if self.bits_used == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits_used) - 1
        }
    }

    /// Extract the (unscaled) value from its storage bytes.
    ///
    /// `raw` must hold exactly `bytes` bytes. The stored word is read in the
    /// declared endianness, shifted, masked and sign-extended.
    pub fn extract(&self, raw: &[u8]) -> i64 {
        debug_assert_eq!(raw.len(), self.bytes as usize);

        let mut word: u64 = 0;
        if self.big_endian {
            for b in raw {
                word = (word << 8) | u64::from(*b);
            }
        } else {
            for b in raw.iter().rev() {
                word = (word << 8) | u64::from(*b);
            }
        }

        let value = (word >> self.shift) & self.mask();
        if self.signed && self.bits_used < 64 {
            let sign_bit = 1u64 << (self.bits_used - 1);
            if value & sign_bit != 0 {
                return (value | !self.mask()) as i64;
            }
        }
        value as i64
    }
}

/// One device channel: layout plus conversion factors.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Scan-element name, e.g. `in_accel_x`
    pub name: String,
    /// Bit layout from the `_type` file
    pub layout: ChannelLayout,
    /// Multiplicative factor to physical units
    pub scale: f32,
    /// Additive offset in physical units
    pub offset: f32,
    /// Declaration order, also the scan position
    pub index: usize,
}

impl Channel {
    /// Whether this is the timestamp scan element
    pub fn is_timestamp(&self) -> bool {
        self.name.ends_with("timestamp")
    }

    /// Physical value of a raw sample
    pub fn convert(&self, raw: i64) -> f32 {
        raw as f32 * self.scale + self.offset
    }
}
