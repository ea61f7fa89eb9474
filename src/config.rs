//! Configuration loaded from environment variables

use std::path::PathBuf;

use crate::pipeline::Mode;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Processing mode to start in
    pub mode: Mode,

    /// Center frequency in Hz
    pub frequency_hz: u32,

    /// RTL-SDR device index
    pub device_index: u32,

    /// Tuner gain in dB (use 0 for auto)
    pub gain_db: f32,

    /// PPM frequency correction
    pub ppm_error: i32,

    /// Path to the rtl_sdr executable
    pub rtl_sdr_path: PathBuf,

    /// Spectrum FFT size, must be a power of two
    pub fft_size: usize,

    /// Acquisition queue depth in blocks
    pub queue_depth: usize,

    /// Attempt single-bit CRC repair on DF11/DF17
    pub fix_errors: bool,

    /// Also attempt two-bit repair and accept slightly ambiguous candidates
    pub aggressive: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            mode: std::env::var("MODE")
                .ok()
                .and_then(|s| Mode::parse(&s))
                .unwrap_or(Mode::Adsb),

            frequency_hz: std::env::var("FREQUENCY_HZ")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1_090_000_000),

            device_index: std::env::var("DEVICE_INDEX")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            gain_db: std::env::var("DEVICE_GAIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(49.6),

            ppm_error: std::env::var("PPM_ERROR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            rtl_sdr_path: std::env::var("RTL_SDR_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("rtl_sdr")),

            fft_size: std::env::var("FFT_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2048),

            queue_depth: std::env::var("QUEUE_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),

            fix_errors: std::env::var("FIX_ERRORS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),

            aggressive: std::env::var("AGGRESSIVE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
        }
    }
}
