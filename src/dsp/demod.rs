//! FM/AM discriminators and boxcar decimation.
//!
//! Both discriminators keep per-stream state across blocks (last phase for
//! FM, the DC estimate for AM) so audio stays continuous at block
//! boundaries. A mode switch must call `reset()`.
//!
//! Decimation is a plain non-overlapping boxcar average with no anti-alias
//! filter in front of it; the input-to-output rate ratios in this pipeline
//! are small enough that this is an accepted simplification.

use std::f32::consts::PI;

/// Decimation factor applied to FM audio.
pub const FM_DECIMATION: usize = 5;
/// Decimation factor applied to AM audio (narrower audio bandwidth).
pub const AM_DECIMATION: usize = 10;

const IQ_CENTER: f32 = 127.5;

/// FM discriminator: output is the wrapped phase difference between
/// consecutive I/Q samples.
pub struct FmDiscriminator {
    last_phase: f32,
}

impl FmDiscriminator {
    pub fn new() -> Self {
        Self { last_phase: 0.0 }
    }

    pub fn process(&mut self, iq_data: &[u8]) -> Vec<f32> {
        let pairs = iq_data.len() / 2;
        let mut out = Vec::with_capacity(pairs);

        for p in 0..pairs {
            let i = (iq_data[p * 2] as f32 - IQ_CENTER) / IQ_CENTER;
            let q = (iq_data[p * 2 + 1] as f32 - IQ_CENTER) / IQ_CENTER;
            let phase = q.atan2(i);

            let mut delta = phase - self.last_phase;
            if delta > PI {
                delta -= 2.0 * PI;
            }
            if delta < -PI {
                delta += 2.0 * PI;
            }

            out.push(delta);
            self.last_phase = phase;
        }

        out
    }

    pub fn reset(&mut self) {
        self.last_phase = 0.0;
    }
}

impl Default for FmDiscriminator {
    fn default() -> Self {
        Self::new()
    }
}

/// AM discriminator: envelope magnitude minus an exponentially-smoothed
/// DC estimate, normalized by the input dynamic range.
pub struct AmDiscriminator {
    dc_estimate: f32,
}

impl AmDiscriminator {
    pub fn new() -> Self {
        Self { dc_estimate: 0.0 }
    }

    pub fn process(&mut self, iq_data: &[u8]) -> Vec<f32> {
        let pairs = iq_data.len() / 2;
        if pairs == 0 {
            return Vec::new();
        }

        let mut block_mean = 0.0f32;
        for p in 0..pairs {
            let i = iq_data[p * 2] as f32 - IQ_CENTER;
            let q = iq_data[p * 2 + 1] as f32 - IQ_CENTER;
            block_mean += (i * i + q * q).sqrt();
        }
        block_mean /= pairs as f32;

        // First block seeds the estimate directly; afterwards smooth at 0.05.
        self.dc_estimate = if self.dc_estimate == 0.0 {
            block_mean
        } else {
            self.dc_estimate * 0.95 + block_mean * 0.05
        };

        let mut out = Vec::with_capacity(pairs);
        for p in 0..pairs {
            let i = iq_data[p * 2] as f32 - IQ_CENTER;
            let q = iq_data[p * 2 + 1] as f32 - IQ_CENTER;
            let mag = (i * i + q * q).sqrt();
            out.push((mag - self.dc_estimate) / IQ_CENTER);
        }

        out
    }

    pub fn dc_estimate(&self) -> f32 {
        self.dc_estimate
    }

    pub fn reset(&mut self) {
        self.dc_estimate = 0.0;
    }
}

impl Default for AmDiscriminator {
    fn default() -> Self {
        Self::new()
    }
}

/// Boxcar decimator: each output is the mean of `factor` consecutive
/// inputs; a trailing remainder shorter than `factor` is dropped.
pub fn decimate(samples: &[f32], factor: usize) -> Vec<f32> {
    let out_len = samples.len() / factor;
    let mut out = Vec::with_capacity(out_len);

    for k in 0..out_len {
        let sum: f32 = samples[k * factor..(k + 1) * factor].iter().sum();
        out.push(sum / factor as f32);
    }

    out
}
