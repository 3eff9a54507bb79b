//! Gravity vector estimation from resampled accelerometer data
//!
//! The estimator consumes accelerometer samples in g at whatever rate the
//! hardware delivers them, resamples them onto a fixed 13 Hz virtual clock
//! by linear interpolation, and accumulates 13-sample windows. A window
//! whose variance and mean norm indicate a static device yields the gravity
//! vector directly; otherwise window sums accumulate and after five
//! seconds' worth of windows the running average is returned as a
//! fallback. Once an estimate is produced it is latched for the lifetime
//! of the estimator.

/// Virtual resampling rate in Hz
pub const ODR: usize = 13;

/// Variance ceiling for a window to count as static, in g²
pub const STATIC_VAR: f32 = 1e-4;

/// Allowed deviation of the window norm from 1 g
pub const STATIC_MEAN: f32 = 0.1;

/// Largest tolerated gap between consecutive input samples, ms
const MAX_GAP_MS: i64 = 100;

/// Linear interpolator resampling an irregular input stream onto a fixed
/// virtual clock.
#[derive(Debug, Clone)]
pub struct FixedRateResampler {
    /// Timestamp of the last emitted virtual sample, ms
    t_last: i64,
    /// Last two input samples, newest first
    data: [[f32; 3]; 2],
    /// Timestamps of the last two input samples, ms
    t: [i64; 2],
    seen: u32,
    /// Virtual sample period, ms
    period_ms: f32,
}

impl FixedRateResampler {
    pub fn new() -> Self {
        Self {
            t_last: 0,
            data: [[0.0; 3]; 2],
            t: [0; 2],
            seen: 0,
            // 13 Hz
            period_ms: 76.9230,
        }
    }

    /// Feed one input sample; returns the interpolated value when the
    /// virtual clock has a tick due.
    ///
    /// The very first sample passes through unchanged and seeds the clock.
    /// A tick is rejected when it falls beyond the newest input sample or
    /// when the two inputs bracketing it are more than 100 ms apart (or
    /// out of order).
    pub fn resample(&mut self, input: [f32; 3], t_ms: i64) -> Option<[f32; 3]> {
        if self.seen == 0 {
            self.seen = 1;
            self.data[0] = input;
            self.t[0] = t_ms;
            self.t_last = t_ms;
            return Some(input);
        }

        self.data[1] = self.data[0];
        self.data[0] = input;
        self.t[1] = self.t[0];
        self.t[0] = t_ms;
        self.seen = (self.seen + 1).min(5);

        let mut t_current = self.t_last + self.period_ms as i64;
        if t_current > self.t[0] {
            return None;
        }

        let gap = self.t[0] - self.t[1];
        if gap <= 0 || gap > MAX_GAP_MS {
            return None;
        }

        let mut alpha = (t_current - self.t[1]) as f32 / gap as f32;
        if alpha < 0.0 {
            alpha = 0.0;
            t_current = self.t[1];
        }

        let out = [
            self.data[0][0] * alpha + (1.0 - alpha) * self.data[1][0],
            self.data[0][1] * alpha + (1.0 - alpha) * self.data[1][1],
            self.data[0][2] * alpha + (1.0 - alpha) * self.data[1][2],
        ];
        self.t_last = t_current;
        Some(out)
    }
}

impl Default for FixedRateResampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Windowed gravity estimator. Input is accelerometer data in g.
#[derive(Debug, Clone)]
pub struct GravityEstimator {
    n: usize,
    sum: [f32; 3],
    sum_sq: [f32; 3],
    sum_5s: [f32; 3],
    /// Virtual samples consumed by closed windows
    t_total: usize,
    valid: bool,
    resampler: FixedRateResampler,
}

impl GravityEstimator {
    pub fn new() -> Self {
        Self {
            n: 0,
            sum: [0.0; 3],
            sum_sq: [0.0; 3],
            sum_5s: [0.0; 3],
            t_total: 0,
            valid: false,
            resampler: FixedRateResampler::new(),
        }
    }

    /// Whether an estimate has been latched
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Feed one accelerometer sample (g) with its timestamp (ns).
    ///
    /// Returns the gravity vector once available; every call after that
    /// returns the latched estimate.
    pub fn update(&mut self, acc_g: [f32; 3], timestamp_ns: i64) -> Option<[f32; 3]> {
        if self.valid {
            return Some(self.sum_5s);
        }

        // Five seconds of windows without a static one: fall back to the
        // running average
        if self.t_total >= ODR * 5 {
            for v in &mut self.sum_5s {
                *v /= (ODR * 5) as f32;
            }
            self.valid = true;
            return Some(self.sum_5s);
        }

        if self.n < ODR {
            let t_ms = (timestamp_ns as f64 / 1e6) as i64;
            let sample = self.resampler.resample(acc_g, t_ms)?;
            for axis in 0..3 {
                self.sum[axis] += sample[axis];
                self.sum_sq[axis] += sample[axis] * sample[axis];
            }
            self.n += 1;
            return None;
        }

        // Window close: the incoming sample is not consumed
        let mut variance = 0.0f32;
        let mut norm_sq = 0.0f32;
        for axis in 0..3 {
            variance += self.sum_sq[axis] - self.sum[axis] * self.sum[axis] / ODR as f32;
            norm_sq += self.sum_sq[axis];
        }
        variance /= (ODR - 1) as f32;
        // Norm of the window is taken over the summed squares of all axes,
        // so it is the RMS magnitude rather than the magnitude of the mean
        let norm = (norm_sq / ODR as f32).sqrt();

        if variance < STATIC_VAR && (norm - 1.0).abs() < STATIC_MEAN {
            self.valid = true;
            for axis in 0..3 {
                self.sum[axis] /= ODR as f32;
                self.sum_5s[axis] = self.sum[axis];
            }
        } else {
            for axis in 0..3 {
                self.sum_5s[axis] += self.sum[axis];
            }
        }

        self.sum = [0.0; 3];
        self.sum_sq = [0.0; 3];
        self.t_total += self.n;
        self.n = 0;

        if self.valid {
            Some(self.sum_5s)
        } else {
            None
        }
    }
}

impl Default for GravityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP_NS: i64 = 77_000_000; // ~13 Hz input

    fn feed_constant(est: &mut GravityEstimator, v: [f32; 3], calls: usize) -> Option<[f32; 3]> {
        let mut out = None;
        for i in 0..calls {
            out = est.update(v, i as i64 * STEP_NS);
            if out.is_some() {
                break;
            }
        }
        out
    }

    #[test]
    fn first_sample_passes_through() {
        let mut rs = FixedRateResampler::new();
        assert_eq!(rs.resample([0.1, 0.2, 0.3], 1000), Some([0.1, 0.2, 0.3]));
    }

    #[test]
    fn resampler_interpolates_on_virtual_ticks() {
        let mut rs = FixedRateResampler::new();
        rs.resample([0.0, 0.0, 0.0], 0).unwrap();

        // Next input at 100 ms; the virtual tick at 76 ms falls inside
        let out = rs.resample([1.0, 1.0, 1.0], 100).unwrap();
        assert!((out[0] - 0.76).abs() < 1e-5, "got {}", out[0]);
    }

    #[test]
    fn resampler_rejects_large_gaps() {
        let mut rs = FixedRateResampler::new();
        rs.resample([0.0, 0.0, 1.0], 0).unwrap();
        // 150 ms between inputs exceeds the gap limit
        assert_eq!(rs.resample([0.0, 0.0, 1.0], 150), None);
        // Out-of-order timestamps are rejected too
        assert_eq!(rs.resample([0.0, 0.0, 1.0], 140), None);
    }

    #[test]
    fn static_device_converges_within_one_window() {
        let mut est = GravityEstimator::new();
        let gvec = feed_constant(&mut est, [0.0, 0.0, 1.0], 20).expect("estimate");
        assert!(est.is_valid());
        assert!((gvec[2] - 1.0).abs() < 1e-5);
        assert!(gvec[0].abs() < 1e-5 && gvec[1].abs() < 1e-5);
    }

    #[test]
    fn estimate_is_latched() {
        let mut est = GravityEstimator::new();
        let first = feed_constant(&mut est, [0.0, 0.0, 1.0], 20).unwrap();
        // Later motion does not disturb the latched estimate
        let later = est.update([5.0, 5.0, 5.0], 10_000_000_000).unwrap();
        assert_eq!(first, later);
    }

    #[test]
    fn window_norm_uses_rms_of_sum_of_squares() {
        // A tilted but static device: axes (0.6, 0.8, 0.0) has unit norm,
        // and the RMS magnitude equals the mean magnitude for constant
        // input, so it is accepted
        let mut est = GravityEstimator::new();
        let gvec = feed_constant(&mut est, [0.6, 0.8, 0.0], 20).expect("estimate");
        assert!((gvec[0] - 0.6).abs() < 1e-5);
        assert!((gvec[1] - 0.8).abs() < 1e-5);
    }

    #[test]
    fn shaking_device_hits_five_second_fallback() {
        // Alternate between two values a full 2 g apart so every window
        // fails the variance gate; after five windows the accumulated
        // average is returned
        let mut est = GravityEstimator::new();
        let mut out = None;
        for i in 0..200 {
            let z = if i % 2 == 0 { 2.0 } else { 0.0 };
            out = est.update([0.0, 0.0, z], i as i64 * STEP_NS);
            if out.is_some() {
                break;
            }
        }
        let gvec = out.expect("fallback estimate");
        assert!(est.is_valid());
        // Interpolated samples average close to 1 g on z
        assert!((gvec[2] - 1.0).abs() < 0.2, "got {}", gvec[2]);
    }

    #[test]
    fn non_static_high_norm_keeps_accumulating() {
        // Constant 2 g is perfectly low-variance but its norm is far from
        // 1 g, so the static gate rejects it until the fallback fires
        let mut est = GravityEstimator::new();
        for i in 0..30 {
            assert_eq!(est.update([0.0, 0.0, 2.0], i as i64 * STEP_NS), None);
        }
        assert!(!est.is_valid());
    }
}
