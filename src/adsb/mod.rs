//! Mode S / ADS-B frame detection and decoding.

pub mod crc;
pub mod decode;
pub mod detect;
pub mod icao;
pub mod types;

pub use detect::FrameDetector;
pub use types::DecodedMessage;

/// Long (extended squitter) frame length in bits.
pub const LONG_MSG_BITS: usize = 112;
/// Short frame length in bits.
pub const SHORT_MSG_BITS: usize = 56;
/// Long frame length in bytes.
pub const LONG_MSG_BYTES: usize = LONG_MSG_BITS / 8;

/// Frame length in bits as declared by the downlink format: DF 16 and
/// above are long frames.
pub fn msg_len_bits(df: u8) -> usize {
    if df & 0x10 != 0 {
        LONG_MSG_BITS
    } else {
        SHORT_MSG_BITS
    }
}
