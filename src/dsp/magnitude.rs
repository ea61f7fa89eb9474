//! Magnitude computation for IQ samples
//!
//! RTL-SDR style input: 8-bit unsigned IQ pairs centered at 127.
//! Magnitude is sqrt(I² + Q²) over the folded quadrant, precomputed
//! once into a lookup table so the preamble scan never touches sqrt.

/// One axis of the folded I/Q domain: |sample - 127| is at most 128.
const AXIS_MAX: usize = 128;

/// Scale applied to the exact magnitude so it fits u16 with useful resolution.
const MAG_SCALE: f32 = 360.0;

/// Pre-computed magnitude lookup table for fast IQ → magnitude conversion.
/// Index: i * 129 + q where i, q are the folded 0..=128 components.
pub struct MagnitudeTable {
    table: Vec<u16>,
}

impl MagnitudeTable {
    /// Build the (AXIS_MAX + 1)² table. Exact sqrt, computed once.
    pub fn new() -> Self {
        let axis = AXIS_MAX + 1;
        let mut table = vec![0u16; axis * axis];

        for i in 0..axis {
            for q in 0..axis {
                let mag = ((i * i + q * q) as f32).sqrt() * MAG_SCALE;
                table[i * axis + q] = mag.round() as u16;
            }
        }

        Self { table }
    }

    /// Convert one raw IQ byte pair to magnitude.
    #[inline(always)]
    pub fn magnitude(&self, i: u8, q: u8) -> u16 {
        let fi = (i as i32 - 127).unsigned_abs() as usize;
        let fq = (q as i32 - 127).unsigned_abs() as usize;
        self.table[fi * (AXIS_MAX + 1) + fq]
    }

    /// Convert an interleaved I/Q block into a magnitude vector,
    /// one value per pair.
    pub fn compute_magnitudes(&self, iq_data: &[u8]) -> Vec<u16> {
        let pairs = iq_data.len() / 2;
        let mut out = Vec::with_capacity(pairs);
        for p in 0..pairs {
            out.push(self.magnitude(iq_data[p * 2], iq_data[p * 2 + 1]));
        }
        out
    }
}

impl Default for MagnitudeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_is_zero() {
        let table = MagnitudeTable::new();
        assert_eq!(table.magnitude(127, 127), 0);
    }

    #[test]
    fn test_full_scale_axes_match() {
        let table = MagnitudeTable::new();
        // Folding makes 127±n symmetric per axis: 0 and 254 both sit
        // 127 away from center, and 255 reaches the full 128.
        assert_eq!(table.magnitude(254, 127), table.magnitude(0, 127));
        assert_eq!(table.magnitude(0, 127), (127.0f32 * 360.0).round() as u16);
        assert_eq!(table.magnitude(255, 127), (128.0f32 * 360.0).round() as u16);
    }

    #[test]
    fn test_exact_sqrt() {
        let table = MagnitudeTable::new();
        // 3-4-5 triangle: I = 127+3, Q = 127+4 → 5 * 360
        assert_eq!(table.magnitude(130, 131), 1800);
    }

    #[test]
    fn test_bulk_conversion() {
        let table = MagnitudeTable::new();
        let iq = [127u8, 127, 130, 131, 255, 127];
        let mags = table.compute_magnitudes(&iq);
        assert_eq!(mags.len(), 3);
        assert_eq!(mags[0], 0);
        assert_eq!(mags[1], 1800);
    }
}
