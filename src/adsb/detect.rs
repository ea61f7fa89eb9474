//! Mode S preamble detection and PPM bit slicing.
//!
//! Mode S preamble at 2 MSPS (0.5µs per sample): pulses at 0, 1, 3.5 and
//! 4.5µs land on samples 0, 2, 7 and 9, with the rest of the 8µs preamble
//! quiet. Each data bit is 1µs = 2 samples, high-then-low for 1 and
//! low-then-high for 0.
//!
//! An offset that fails to yield a valid frame is retried once with a
//! half-sample phase correction before the scan moves on.

use tracing::{debug, trace};

use super::decode::Decoder;
use super::types::DecodedMessage;
use super::{msg_len_bits, LONG_MSG_BITS, LONG_MSG_BYTES, SHORT_MSG_BITS};
use crate::dsp::MagnitudeTable;

/// Preamble length in microseconds (samples = 2x).
const PREAMBLE_US: usize = 8;
/// Preamble plus a long frame, in microseconds.
const FULL_LEN_US: usize = PREAMBLE_US + LONG_MSG_BITS;

#[derive(Debug, Default)]
pub struct DetectorStats {
    pub samples_processed: u64,
    pub preambles_detected: u64,
    pub frames_decoded: u64,
    pub crc_errors: u64,
    pub short_frames: u64,
    pub long_frames: u64,
    pub repaired_frames: u64,
    pub phase_corrected_frames: u64,
}

/// Scans magnitude vectors for Mode S frames and hands candidates to the
/// decoder.
pub struct FrameDetector {
    mag_table: MagnitudeTable,
    decoder: Decoder,
    aggressive: bool,
    pub stats: DetectorStats,
}

impl FrameDetector {
    pub fn new(fix_errors: bool, aggressive: bool) -> Self {
        Self {
            mag_table: MagnitudeTable::new(),
            decoder: Decoder::new(fix_errors, aggressive),
            aggressive,
            stats: DetectorStats::default(),
        }
    }

    /// Process a block of interleaved I/Q bytes and return every frame that
    /// passed CRC (directly, by repair, or by brute-forced address).
    pub fn process_block(&mut self, iq_data: &[u8]) -> Vec<DecodedMessage> {
        let mut mag = self.mag_table.compute_magnitudes(iq_data);
        self.stats.samples_processed += mag.len() as u64;
        self.scan(&mut mag)
    }

    /// Scan a precomputed magnitude vector. The vector is scribbled on
    /// during phase-correction retries but restored before each candidate
    /// is abandoned.
    pub fn scan(&mut self, mag: &mut [u16]) -> Vec<DecodedMessage> {
        let mut frames = Vec::new();
        if mag.len() < FULL_LEN_US * 2 {
            return frames;
        }

        let scan_end = mag.len() - FULL_LEN_US * 2;
        let mut bits = [0u8; LONG_MSG_BITS];
        let mut msg = [0u8; LONG_MSG_BYTES];
        let mut aux = [0u16; LONG_MSG_BITS * 2];
        let mut use_correction = false;

        let mut j = 0;
        while j < scan_end {
            let data_start = j + PREAMBLE_US * 2;

            if use_correction {
                // Retry pass: save the data region, then nudge every other
                // sample if the preamble edges suggest a half-sample offset.
                aux.copy_from_slice(&mag[data_start..data_start + LONG_MSG_BITS * 2]);
                if j > 0 && detect_out_of_phase(mag, j) != 0 {
                    apply_phase_correction(mag, j);
                }
            } else {
                // Pulse/valley shape of the preamble.
                if !(mag[j] > mag[j + 1]
                    && mag[j + 1] < mag[j + 2]
                    && mag[j + 2] > mag[j + 3]
                    && mag[j + 3] < mag[j]
                    && mag[j + 4] < mag[j]
                    && mag[j + 5] < mag[j]
                    && mag[j + 6] < mag[j]
                    && mag[j + 7] > mag[j + 8]
                    && mag[j + 8] < mag[j + 9]
                    && mag[j + 9] > mag[j + 6])
                {
                    j += 1;
                    continue;
                }

                // The two in-preamble quiet samples and the four samples
                // after the last pulse must stay below 2/3 of the average
                // pulse level.
                let high = (f32::from(mag[j])
                    + f32::from(mag[j + 2])
                    + f32::from(mag[j + 7])
                    + f32::from(mag[j + 9]))
                    / 6.0;
                if f32::from(mag[j + 4]) >= high || f32::from(mag[j + 5]) >= high {
                    j += 1;
                    continue;
                }
                if f32::from(mag[j + 11]) >= high
                    || f32::from(mag[j + 12]) >= high
                    || f32::from(mag[j + 13]) >= high
                    || f32::from(mag[j + 14]) >= high
                {
                    j += 1;
                    continue;
                }

                self.stats.preambles_detected += 1;
            }

            // PPM slice: equal halves mark the bit ambiguous; only
            // ambiguity inside the short-frame span counts as an error.
            let mut errors = 0u32;
            for i in (0..LONG_MSG_BITS * 2).step_by(2) {
                let low = mag[data_start + i];
                let high = mag[data_start + i + 1];
                if low > high {
                    bits[i / 2] = 1;
                } else if high > low {
                    bits[i / 2] = 0;
                } else {
                    bits[i / 2] = 2;
                    if i < SHORT_MSG_BITS * 2 {
                        errors += 1;
                    }
                }
            }

            if use_correction {
                mag[data_start..data_start + LONG_MSG_BITS * 2].copy_from_slice(&aux);
            }

            // Pack 8 bit-values per byte. Ambiguous bits carry the value 2,
            // so the accumulator overflows u8; keeping only the low byte
            // reproduces how such frames historically reached the CRC.
            for i in (0..LONG_MSG_BITS).step_by(8) {
                let packed = (u32::from(bits[i]) << 7)
                    | (u32::from(bits[i + 1]) << 6)
                    | (u32::from(bits[i + 2]) << 5)
                    | (u32::from(bits[i + 3]) << 4)
                    | (u32::from(bits[i + 4]) << 3)
                    | (u32::from(bits[i + 5]) << 2)
                    | (u32::from(bits[i + 6]) << 1)
                    | u32::from(bits[i + 7]);
                msg[i / 8] = packed as u8;
            }

            let df = msg[0] >> 3;
            let msglen_bytes = msg_len_bits(df) / 8;

            let mut good_message = false;
            if errors == 0 || (self.aggressive && errors < 3) {
                if let Ok(mut mm) = self.decoder.parse(&msg) {
                    if mm.crc_ok {
                        good_message = true;
                        mm.phase_corrected = use_correction;

                        self.stats.frames_decoded += 1;
                        if mm.bits == SHORT_MSG_BITS {
                            self.stats.short_frames += 1;
                        } else {
                            self.stats.long_frames += 1;
                        }
                        if mm.repair.is_some() {
                            self.stats.repaired_frames += 1;
                        }
                        if mm.phase_corrected {
                            self.stats.phase_corrected_frames += 1;
                        }

                        trace!(
                            "frame at sample {}: DF={} hex={}",
                            j,
                            mm.df,
                            mm.to_hex()
                        );
                        frames.push(mm);
                    } else {
                        self.stats.crc_errors += 1;
                        if self.stats.crc_errors <= 10 || self.stats.crc_errors % 50 == 0 {
                            debug!(
                                "CRC error #{}: DF={} hex={}",
                                self.stats.crc_errors,
                                df,
                                hex::encode(&msg[..msglen_bytes])
                            );
                        }
                    }
                }
            }

            if !good_message && !use_correction {
                // Retry this offset once with phase correction.
                use_correction = true;
                continue;
            }
            if good_message {
                j += (PREAMBLE_US + msglen_bytes * 8) * 2;
            }
            use_correction = false;
            j += 1;
        }

        frames
    }
}

/// Heuristic for a half-sample offset: a pulse leaking more than a third
/// of its energy into a neighbouring quiet sample. Positive means the
/// signal is late, negative early, zero in phase.
fn detect_out_of_phase(mag: &[u16], offset: usize) -> i32 {
    if f32::from(mag[offset + 3]) > f32::from(mag[offset + 2]) / 3.0 {
        return 1;
    }
    if f32::from(mag[offset + 10]) > f32::from(mag[offset + 9]) / 3.0 {
        return 1;
    }
    if f32::from(mag[offset + 6]) > f32::from(mag[offset + 7]) / 3.0 {
        return -1;
    }
    if f32::from(mag[offset - 1]) > f32::from(mag[offset + 1]) / 3.0 {
        return -1;
    }
    0
}

/// Sharpen the data region in place: after each sliced bit, boost or damp
/// the first sample of the next bit depending on which half carried the
/// energy.
fn apply_phase_correction(mag: &mut [u16], offset: usize) {
    for j in (16..(LONG_MSG_BITS - 1) * 2).step_by(2) {
        let next = u32::from(mag[offset + j + 2]);
        mag[offset + j + 2] = if mag[offset + j] > mag[offset + j + 1] {
            (next * 5 / 4) as u16
        } else {
            (next * 4 / 5) as u16
        };
    }
}
