//! CRC-24 checksum and bit-repair for Mode S messages.
//!
//! The checksum is evaluated with a precomputed XOR table: one entry per
//! message bit position, zero for the 24 parity bits themselves. Short
//! (56-bit) frames index the table with a 56-bit offset so they share the
//! tail of the long-frame table.

use super::{LONG_MSG_BITS, LONG_MSG_BYTES, SHORT_MSG_BITS};

/// Per-bit syndrome table for the Mode S CRC-24 generator polynomial.
/// The last 24 entries are zero: flipping a parity bit changes only the
/// embedded checksum, not the computed one.
const CHECKSUM_TABLE: [u32; LONG_MSG_BITS] = [
    0x3935ea, 0x1c9af5, 0xf1b77e, 0x78dbbf, 0xc397db, 0x9e31e9, 0xb0e2f0,
    0x587178, 0x2c38bc, 0x161c5e, 0x0b0e2f, 0xfa7d13, 0x82c48d, 0xbe9842,
    0x5f4c21, 0xd05c14, 0x682e0a, 0x341705, 0xe5f186, 0x72f8c3, 0xc68665,
    0x9cb936, 0x4e5c9b, 0xd8d449, 0x939020, 0x49c810, 0x24e408, 0x127204,
    0x093902, 0x049c81, 0xfdb444, 0x7eda22, 0x3f6d11, 0xe04c8c, 0x702646,
    0x381323, 0xe3f395, 0x8e03ce, 0x4701e7, 0xdc7af7, 0x91c77f, 0xb719bb,
    0xa476d9, 0xadc168, 0x56e0b4, 0x2b705a, 0x15b82d, 0xf52612, 0x7a9309,
    0xc2b380, 0x6159c0, 0x30ace0, 0x185670, 0x0c2b38, 0x06159c, 0x030ace,
    0x018567, 0xff38b7, 0x80665f, 0xbfc92b, 0xa01e91, 0xaff54c, 0x57faa6,
    0x2bfd53, 0xea04ad, 0x8af852, 0x457c29, 0xdd4410, 0x6ea208, 0x375104,
    0x1ba882, 0x0dd441, 0xf91024, 0x7c8812, 0x3e4409, 0xe0d800, 0x706c00,
    0x383600, 0x1c1b00, 0x0e0d80, 0x0706c0, 0x038360, 0x01c1b0, 0x00e0d8,
    0x00706c, 0x003836, 0x001c1b, 0xfff409, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Compute the CRC-24 over a message of `bits` length (56 or 112).
pub fn checksum(msg: &[u8], bits: usize) -> u32 {
    let offset = if bits == LONG_MSG_BITS {
        0
    } else {
        LONG_MSG_BITS - SHORT_MSG_BITS
    };

    let mut crc = 0u32;
    for j in 0..bits {
        let byte = j / 8;
        let bitmask = 1u8 << (7 - (j % 8));
        if msg[byte] & bitmask != 0 {
            crc ^= CHECKSUM_TABLE[j + offset];
        }
    }
    crc
}

/// The 24-bit checksum embedded in the final three message bytes.
pub fn embedded_crc(msg: &[u8], bits: usize) -> u32 {
    let len = bits / 8;
    (u32::from(msg[len - 3]) << 16) | (u32::from(msg[len - 2]) << 8) | u32::from(msg[len - 1])
}

/// Try every single-bit flip in ascending bit order; on the first flip that
/// makes the checksum match, repair `msg` in place and return the bit index.
pub fn fix_single_bit_errors(msg: &mut [u8], bits: usize) -> Option<usize> {
    let len = bits / 8;
    let mut aux = [0u8; LONG_MSG_BYTES];

    for j in 0..bits {
        let byte = j / 8;
        let bitmask = 1u8 << (7 - (j % 8));

        aux[..len].copy_from_slice(&msg[..len]);
        aux[byte] ^= bitmask;

        if embedded_crc(&aux, bits) == checksum(&aux, bits) {
            msg[..len].copy_from_slice(&aux[..len]);
            return Some(j);
        }
    }
    None
}

/// Try every unordered pair of bit flips, outer index < inner index, both
/// ascending. The first matching pair wins, which biases recovery toward
/// lexicographically-earliest pairs rather than minimum distance; callers
/// depend on that determinism.
pub fn fix_two_bit_errors(msg: &mut [u8], bits: usize) -> Option<(usize, usize)> {
    let len = bits / 8;
    let mut aux = [0u8; LONG_MSG_BYTES];

    for j in 0..bits {
        let byte1 = j / 8;
        let bitmask1 = 1u8 << (7 - (j % 8));

        for i in (j + 1)..bits {
            let byte2 = i / 8;
            let bitmask2 = 1u8 << (7 - (i % 8));

            aux[..len].copy_from_slice(&msg[..len]);
            aux[byte1] ^= bitmask1;
            aux[byte2] ^= bitmask2;

            if embedded_crc(&aux, bits) == checksum(&aux, bits) {
                msg[..len].copy_from_slice(&aux[..len]);
                return Some((j, i));
            }
        }
    }
    None
}
