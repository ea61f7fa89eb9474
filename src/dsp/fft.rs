//! Radix-2 FFT and log-power spectrum analysis.
//!
//! The transform is an iterative in-place Cooley–Tukey over `Complex<f32>`:
//! bit-reversal permutation, then butterfly stages with a rolling twiddle
//! factor (one complex multiply per element instead of per-element trig).
//! A non-power-of-two length is a configuration error and is rejected
//! up front rather than silently passed through.

use num_complex::Complex;
use std::f32::consts::PI;
use thiserror::Error;

/// Signal-processing configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DspError {
    #[error("FFT size must be a power of two >= 2, got {0}")]
    InvalidFftSize(usize),
    #[error("sample block holds {got} I/Q pairs, analyzer needs {need}")]
    BlockTooShort { got: usize, need: usize },
}

/// In-place discrete Fourier transform, O(N log N).
pub fn fft_in_place(data: &mut [Complex<f32>]) -> Result<(), DspError> {
    let n = data.len();
    if n < 2 || !n.is_power_of_two() {
        return Err(DspError::InvalidFftSize(n));
    }

    // Bit-reversal permutation.
    let mut rev = vec![0usize; n];
    for i in 1..n {
        rev[i] = (rev[i >> 1] >> 1) | if i & 1 == 1 { n >> 1 } else { 0 };
        if i < rev[i] {
            data.swap(i, rev[i]);
        }
    }

    // Butterfly stages.
    let mut len = 2;
    while len <= n {
        let half = len >> 1;
        let angle = -2.0 * PI / len as f32;
        let w = Complex::new(angle.cos(), angle.sin());

        for base in (0..n).step_by(len) {
            let mut twiddle = Complex::new(1.0, 0.0);
            for k in 0..half {
                let u = data[base + k];
                let v = data[base + k + half] * twiddle;
                data[base + k] = u + v;
                data[base + k + half] = u - v;
                twiddle *= w;
            }
        }
        len <<= 1;
    }

    Ok(())
}

/// Fixed-size spectrum analyzer: Hann window, FFT, log power,
/// DC bin rotated to the middle of the output for display.
pub struct SpectrumAnalyzer {
    size: usize,
    window: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Result<Self, DspError> {
        if size < 2 || !size.is_power_of_two() {
            return Err(DspError::InvalidFftSize(size));
        }

        let denom = (size - 1) as f32;
        let window = (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / denom).cos()))
            .collect();

        Ok(Self { size, window })
    }

    /// Transform the first `size` I/Q pairs of a raw block into a
    /// log-power spectrum in display order (DC at index size/2).
    pub fn analyze(&self, iq_data: &[u8]) -> Result<Vec<f32>, DspError> {
        let pairs = iq_data.len() / 2;
        if pairs < self.size {
            return Err(DspError::BlockTooShort {
                got: pairs,
                need: self.size,
            });
        }

        let mut buf: Vec<Complex<f32>> = (0..self.size)
            .map(|i| {
                let re = (iq_data[i * 2] as f32 - 127.5) / 127.5;
                let im = (iq_data[i * 2 + 1] as f32 - 127.5) / 127.5;
                Complex::new(re, im) * self.window[i]
            })
            .collect();

        fft_in_place(&mut buf)?;

        // Log power, rotated so bin 0 (DC) lands in the middle.
        let half = self.size / 2;
        let mut spectrum = vec![0.0f32; self.size];
        for (bin, c) in buf.iter().enumerate() {
            let power = c.re * c.re + c.im * c.im;
            spectrum[(bin + half) % self.size] = 10.0 * power.log10();
        }

        Ok(spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_non_power_of_two() {
        let mut data = vec![Complex::new(0.0f32, 0.0); 12];
        assert_eq!(fft_in_place(&mut data), Err(DspError::InvalidFftSize(12)));

        let mut one = vec![Complex::new(1.0f32, 0.0)];
        assert_eq!(fft_in_place(&mut one), Err(DspError::InvalidFftSize(1)));

        assert!(matches!(
            SpectrumAnalyzer::new(1000),
            Err(DspError::InvalidFftSize(1000))
        ));
    }

    #[test]
    fn test_zero_signal_transforms_to_zero() {
        for n in [2usize, 8, 64, 1024] {
            let mut data = vec![Complex::new(0.0f32, 0.0); n];
            fft_in_place(&mut data).unwrap();
            for c in data {
                assert_eq!(c, Complex::new(0.0, 0.0));
            }
        }
    }

    #[test]
    fn test_real_sinusoid_concentrates_at_mirror_bins() {
        let n = 256;
        let k = 19;
        let mut data: Vec<Complex<f32>> = (0..n)
            .map(|i| {
                let phase = 2.0 * PI * k as f32 * i as f32 / n as f32;
                Complex::new(phase.cos(), 0.0)
            })
            .collect();
        fft_in_place(&mut data).unwrap();

        for (bin, c) in data.iter().enumerate() {
            let mag = c.norm();
            if bin == k || bin == n - k {
                assert_relative_eq!(mag, n as f32 / 2.0, epsilon = 1e-2);
            } else {
                assert!(mag < 1e-2, "bin {} leaked magnitude {}", bin, mag);
            }
        }
    }

    #[test]
    fn test_hann_window_endpoints() {
        let analyzer = SpectrumAnalyzer::new(64).unwrap();
        assert_relative_eq!(analyzer.window[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(analyzer.window[63], 0.0, epsilon = 1e-6);
        assert_relative_eq!(analyzer.window[31], 1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_dc_lands_in_the_middle() {
        let n = 64;
        let analyzer = SpectrumAnalyzer::new(n).unwrap();
        // Constant offset from center → all energy at DC.
        let iq = vec![200u8; n * 2];
        let spectrum = analyzer.analyze(&iq).unwrap();
        assert_eq!(spectrum.len(), n);

        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, n / 2);
    }

    #[test]
    fn test_analyze_rejects_short_block() {
        let analyzer = SpectrumAnalyzer::new(2048).unwrap();
        let iq = vec![127u8; 100];
        assert!(matches!(
            analyzer.analyze(&iq),
            Err(DspError::BlockTooShort { got: 50, need: 2048 })
        ));
    }
}
