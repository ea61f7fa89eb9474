//! Decoded Mode S message types.

use serde::Serialize;

/// Unit of a decoded altitude field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AltitudeUnit {
    Feet,
    Meters,
}

/// Altitude with its unit. The metric (M-bit) encoding is not numerically
/// decoded; such frames carry a zero placeholder with `Meters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Altitude {
    pub value: i32,
    pub unit: AltitudeUnit,
}

/// Which bits a CRC repair flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Repair {
    SingleBit(usize),
    TwoBits(usize, usize),
}

/// Airborne velocity report (DF17 type code 19, subtypes 1-2).
/// Raw east-west/north-south components are kept alongside the derived
/// speed and heading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Velocity {
    pub ew_dir: u8,
    pub ew_velocity: u16,
    pub ns_dir: u8,
    pub ns_velocity: u16,
    pub vert_rate_source: u8,
    pub vert_rate_sign: u8,
    pub vert_rate: u16,
    /// Euclidean norm of the two components, when both are nonzero.
    pub speed: Option<f64>,
    /// Track in degrees [0, 360), derived from the signed components.
    pub heading: Option<f64>,
}

/// Direct heading report (DF17 type code 19, subtypes 3-4).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Heading {
    pub valid: bool,
    pub degrees: f64,
}

/// Raw CPR position fields (DF17 type codes 9-18). Left uninterpreted:
/// resolving absolute coordinates needs a multi-frame reference algorithm
/// that lives outside this pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawPosition {
    /// 17-bit CPR latitude.
    pub latitude: u32,
    /// 17-bit CPR longitude.
    pub longitude: u32,
    /// CPR frame parity: true for odd frames.
    pub odd: bool,
    /// UTC-synchronized time flag.
    pub utc_synced: bool,
}

/// One accepted Mode S frame. Owned by the caller after return; the
/// decoder retains nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    /// Frame bytes after any repair, `bits / 8` long.
    pub raw: Vec<u8>,
    /// Downlink format (top 5 bits of byte 0).
    pub df: u8,
    /// Declared frame length in bits (56 or 112).
    pub bits: usize,
    /// ICAO 24-bit address, brute-force recovered for non-squitter formats.
    pub icao: u32,
    /// Embedded CRC value (recomputed after repair).
    pub crc: u32,
    pub crc_ok: bool,
    /// Set when a 1- or 2-bit CRC repair was applied.
    pub repair: Option<Repair>,
    /// Set when the frame was recovered via half-sample phase correction.
    pub phase_corrected: bool,
    /// Capability / flight status field (low 3 bits of byte 0).
    pub capability: u8,
    /// Downlink request field.
    pub dr: u8,
    /// Utility message field.
    pub um: u8,
    /// Extended squitter type code (byte 4, top 5 bits).
    pub metype: u8,
    /// Extended squitter subtype (byte 4, low 3 bits).
    pub mesub: u8,
    /// 4-digit identity (squawk) from the interleaved A/B/C/D groups.
    /// Decoded for every frame; only meaningful for identity replies.
    pub identity: u16,
    pub altitude: Option<Altitude>,
    /// Aircraft category for identification frames (type code - 1).
    pub aircraft_type: Option<u8>,
    /// Callsign with surrounding spaces trimmed.
    pub callsign: Option<String>,
    pub velocity: Option<Velocity>,
    pub heading: Option<Heading>,
    pub raw_position: Option<RawPosition>,
    /// Receive timestamp, unix milliseconds.
    pub timestamp_ms: u64,
}

impl DecodedMessage {
    /// Frame bytes rendered as uppercase hex, dump1090 style.
    pub fn to_hex(&self) -> String {
        self.raw.iter().map(|b| format!("{:02X}", b)).collect()
    }
}
