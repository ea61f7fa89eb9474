//! Signal processing blocks: magnitude conversion, spectral analysis,
//! and analog demodulation.

pub mod demod;
pub mod fft;
pub mod magnitude;

pub use demod::{decimate, AmDiscriminator, FmDiscriminator, AM_DECIMATION, FM_DECIMATION};
pub use fft::SpectrumAnalyzer;
pub use magnitude::MagnitudeTable;
