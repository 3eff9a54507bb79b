//! Half-precision encoder for the embedded classifier's comparator
//! registers
//!
//! Round-to-zero conversion: mantissa bits beyond half precision are
//! truncated, values below the smallest normal flush to zero, values above
//! the largest normal clamp to it, and the sign bit is re-inserted
//! unconditionally. Byte-exact with the comparator's expectations, so this
//! is kept as a pure bit transform.

/// Encode an `f32` as IEEE-754 half-precision bits.
pub fn float16(x: f32) -> u16 {
    let bits = x.to_bits();

    let magnitude = bits & 0x7FFF_FFFF;
    let sign = (bits & 0x8000_0000) >> 16;
    let exponent = bits & 0x7F80_0000;

    // Align the mantissa and rebias the exponent
    let mut half = (magnitude >> 13).wrapping_sub(0x1C000);

    if exponent < 0x3880_0000 {
        // Below the smallest half normal: flush to zero
        half = 0;
    }
    if exponent > 0x4700_0000 {
        // Above the largest half normal: clamp to 65504
        half = 0x7BFF;
    }
    if exponent == 0 {
        // f32 denormals are treated as zero
        half = 0;
    }

    (half | sign) as u16
}

/// Decode half-precision bits back to `f32` (test support and diagnostics).
pub fn float16_to_f32(h: u16) -> f32 {
    let sign = u32::from(h >> 15) << 31;
    let exponent = u32::from(h >> 10) & 0x1F;
    let mantissa = u32::from(h) & 0x3FF;

    let bits = match exponent {
        0 => {
            if mantissa == 0 {
                sign
            } else {
                // Subnormal half: renormalize
                let shift = mantissa.leading_zeros() - 21;
                let mant = (mantissa << (shift + 1)) & 0x3FF;
                let exp = 127 - 15 - shift;
                sign | (exp << 23) | (mant << 13)
            }
        }
        0x1F => sign | 0x7F80_0000 | (mantissa << 13),
        _ => sign | ((exponent + 127 - 15) << 23) | (mantissa << 13),
    };

    f32::from_bits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(float16(0.0), 0x0000);
        assert_eq!(float16(1.0), 0x3C00);
        assert_eq!(float16(-1.0), 0xBC00);
        assert_eq!(float16(0.5), 0x3800);
        assert_eq!(float16(65504.0), 0x7BFF);
    }

    #[test]
    fn idempotent_over_representable_halves() {
        // Every normal half value survives a decode-encode round trip
        for exp in 1u16..=30 {
            for mant in (0u16..0x400).step_by(7) {
                for sign in [0u16, 0x8000] {
                    let h = sign | (exp << 10) | mant;
                    assert_eq!(float16(float16_to_f32(h)), h, "half bits {h:#06x}");
                }
            }
        }
    }

    #[test]
    fn flushes_below_smallest_normal() {
        // 2^-15 is below the smallest half normal (2^-14)
        assert_eq!(float16(3.05e-5), 0x0000);
        assert_eq!(float16(-3.05e-5), 0x8000);
    }

    #[test]
    fn clamps_above_max() {
        assert_eq!(float16(1e6), 0x7BFF);
        assert_eq!(float16(70000.0), 0x7BFF);
        assert_eq!(float16(-1e6), 0xFBFF);
    }

    #[test]
    fn sign_preserved_for_all_magnitudes() {
        for v in [1e-30f32, 1e-3, 1.0, 1e3, 1e30] {
            assert_eq!(float16(-v) & 0x8000, 0x8000);
            assert_eq!(float16(v) & 0x8000, 0);
        }
    }

    #[test]
    fn rounds_toward_zero() {
        // 1.0 + 2^-11 is between two half values; truncation picks 1.0
        assert_eq!(float16(1.0 + 4.8828125e-4), 0x3C00);
    }
}
