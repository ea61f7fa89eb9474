//! Mode S frame decoder: CRC validation and repair, ICAO bookkeeping,
//! and protocol field extraction.

use chrono::Utc;
use thiserror::Error;

use super::crc::{checksum, embedded_crc, fix_single_bit_errors, fix_two_bit_errors};
use super::icao::IcaoCache;
use super::types::{
    Altitude, AltitudeUnit, DecodedMessage, Heading, RawPosition, Repair, Velocity,
};
use super::{msg_len_bits, LONG_MSG_BYTES};

/// Callsign character lookup table (6-bit AIS subset).
const AIS_CHARSET: &[u8; 64] =
    b"?ABCDEFGHIJKLMNOPQRSTUVWXYZ????? ???????????????0123456789??????";

/// Downlink formats that do not self-report a checksum-covered address;
/// their address is XOR-overlaid on the parity field and must be
/// confirmed against the ICAO cache.
const ADDRESS_OVERLAY_FORMATS: [u8; 7] = [0, 4, 5, 16, 20, 21, 24];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("buffer shorter than the declared frame length")]
    InvalidLength,
}

/// Stateful Mode S decoder. Owns the ICAO cache that confirmed squitters
/// feed and brute-force validation consults.
pub struct Decoder {
    fix_errors: bool,
    aggressive: bool,
    icao_cache: IcaoCache,
}

impl Decoder {
    pub fn new(fix_errors: bool, aggressive: bool) -> Self {
        Self {
            fix_errors,
            aggressive,
            icao_cache: IcaoCache::new(),
        }
    }

    /// Decode one frame. CRC failure is not an error: the returned message
    /// carries `crc_ok: false` and the caller drops it.
    pub fn parse(&mut self, raw: &[u8]) -> Result<DecodedMessage, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::InvalidLength);
        }

        let df = raw[0] >> 3;
        let bits = msg_len_bits(df);
        let nbytes = bits / 8;
        if raw.len() < nbytes {
            return Err(ParseError::InvalidLength);
        }

        let mut msg = [0u8; LONG_MSG_BYTES];
        msg[..nbytes].copy_from_slice(&raw[..nbytes]);

        let mut crc = embedded_crc(&msg, bits);
        let mut crc_ok = crc == checksum(&msg, bits);
        let mut repair = None;

        if !crc_ok && self.fix_errors && (df == 11 || df == 17) {
            if let Some(bit) = fix_single_bit_errors(&mut msg[..nbytes], bits) {
                repair = Some(Repair::SingleBit(bit));
                crc = checksum(&msg, bits);
                crc_ok = true;
            } else if self.aggressive && df == 17 {
                if let Some((first, second)) = fix_two_bit_errors(&mut msg[..nbytes], bits) {
                    repair = Some(Repair::TwoBits(first, second));
                    crc = checksum(&msg, bits);
                    crc_ok = true;
                }
            }
        }

        let capability = msg[0] & 7;
        let mut icao =
            (u32::from(msg[1]) << 16) | (u32::from(msg[2]) << 8) | u32::from(msg[3]);
        let metype = msg[4] >> 3;
        let mesub = msg[4] & 7;
        let dr = (msg[1] >> 3) & 31;
        let um = ((msg[1] & 7) << 3) | (msg[2] >> 5);

        // Identity (squawk): four interleaved 3-bit groups recombined
        // into a 4-digit octal-style code.
        let a = ((msg[3] & 0x80) >> 5) | (msg[2] & 0x02) | ((msg[2] & 0x08) >> 3);
        let b = ((msg[3] & 0x02) << 1) | ((msg[3] & 0x08) >> 2) | ((msg[3] & 0x20) >> 5);
        let c = ((msg[2] & 0x01) << 2) | ((msg[2] & 0x04) >> 1) | ((msg[2] & 0x10) >> 4);
        let d = ((msg[3] & 0x01) << 2) | ((msg[3] & 0x04) >> 1) | ((msg[3] & 0x10) >> 4);
        let identity =
            u16::from(a) * 1000 + u16::from(b) * 100 + u16::from(c) * 10 + u16::from(d);

        let now_secs = Utc::now().timestamp();
        if df != 11 && df != 17 {
            if let Some(addr) = self.brute_force_ap(&msg, bits, now_secs) {
                icao = addr;
                crc_ok = true;
            }
        } else if crc_ok {
            self.icao_cache.insert(icao, now_secs);
        }

        let mut altitude = None;
        let mut aircraft_type = None;
        let mut callsign = None;
        let mut velocity = None;
        let mut heading = None;
        let mut raw_position = None;

        if df == 0 || df == 4 || df == 16 || df == 20 {
            altitude = Some(decode_ac13_field(&msg));
        }

        if df == 17 {
            match metype {
                1..=4 => {
                    aircraft_type = Some(metype - 1);
                    callsign = Some(decode_callsign(&msg));
                }
                9..=18 => {
                    altitude = decode_ac12_field(&msg);
                    raw_position = Some(RawPosition {
                        latitude: ((u32::from(msg[6]) & 3) << 15)
                            | (u32::from(msg[7]) << 7)
                            | (u32::from(msg[8]) >> 1),
                        longitude: ((u32::from(msg[8]) & 1) << 16)
                            | (u32::from(msg[9]) << 8)
                            | u32::from(msg[10]),
                        odd: msg[6] & (1 << 2) != 0,
                        utc_synced: msg[6] & (1 << 3) != 0,
                    });
                }
                19 if (1..=2).contains(&mesub) => {
                    velocity = Some(decode_velocity(&msg));
                }
                19 if (3..=4).contains(&mesub) => {
                    heading = Some(Heading {
                        valid: msg[5] & (1 << 2) != 0,
                        degrees: (360.0 / 128.0)
                            * f64::from(((u16::from(msg[5]) & 3) << 5) | (u16::from(msg[6]) >> 3)),
                    });
                }
                _ => {}
            }
        }

        Ok(DecodedMessage {
            raw: msg[..nbytes].to_vec(),
            df,
            bits,
            icao,
            crc,
            crc_ok,
            repair,
            phase_corrected: false,
            capability,
            dr,
            um,
            metype,
            mesub,
            identity,
            altitude,
            aircraft_type,
            callsign,
            velocity,
            heading,
            raw_position,
            timestamp_ms: Utc::now().timestamp_millis() as u64,
        })
    }

    /// Reconstruct a candidate address for formats whose address is
    /// XOR-overlaid on the parity field, and accept it only if the ICAO
    /// cache saw it recently.
    fn brute_force_ap(&self, msg: &[u8; LONG_MSG_BYTES], bits: usize, now_secs: i64) -> Option<u32> {
        let df = msg[0] >> 3;
        if !ADDRESS_OVERLAY_FORMATS.contains(&df) {
            return None;
        }

        let len = bits / 8;
        let mut aux = [0u8; LONG_MSG_BYTES];
        aux[..len].copy_from_slice(&msg[..len]);

        let crc = checksum(&aux, bits);
        aux[len - 1] ^= (crc & 0xff) as u8;
        aux[len - 2] ^= ((crc >> 8) & 0xff) as u8;
        aux[len - 3] ^= ((crc >> 16) & 0xff) as u8;

        let addr = u32::from(aux[len - 1])
            | (u32::from(aux[len - 2]) << 8)
            | (u32::from(aux[len - 3]) << 16);

        if self.icao_cache.recently_seen(addr, now_secs) {
            Some(addr)
        } else {
            None
        }
    }
}

/// 13-bit altitude field (DF 0/4/16/20). Q-bit means 25 ft steps offset by
/// -1000 ft. The M-bit (metric) case is not numerically decoded and yields
/// a zero placeholder.
fn decode_ac13_field(msg: &[u8; LONG_MSG_BYTES]) -> Altitude {
    let m_bit = msg[3] & (1 << 6) != 0;
    let q_bit = msg[3] & (1 << 4) != 0;

    if m_bit {
        return Altitude {
            value: 0,
            unit: AltitudeUnit::Meters,
        };
    }

    if q_bit {
        let n = ((i32::from(msg[2]) & 31) << 6)
            | ((i32::from(msg[3]) & 0x80) >> 2)
            | ((i32::from(msg[3]) & 0x20) >> 1)
            | (i32::from(msg[3]) & 15);
        return Altitude {
            value: n * 25 - 1000,
            unit: AltitudeUnit::Feet,
        };
    }

    Altitude {
        value: 0,
        unit: AltitudeUnit::Feet,
    }
}

/// 12-bit altitude field (DF17 airborne position). Same Q-bit convention,
/// no M-bit; non-Q encodings are not decoded.
fn decode_ac12_field(msg: &[u8; LONG_MSG_BYTES]) -> Option<Altitude> {
    let q_bit = msg[5] & 1 != 0;
    if !q_bit {
        return None;
    }

    let n = ((i32::from(msg[5]) >> 1) << 4) | ((i32::from(msg[6]) & 0xf0) >> 4);
    Some(Altitude {
        value: n * 25 - 1000,
        unit: AltitudeUnit::Feet,
    })
}

/// Eight 6-bit character groups through the AIS table, surrounding spaces
/// trimmed.
fn decode_callsign(msg: &[u8; LONG_MSG_BYTES]) -> String {
    let codes = [
        msg[5] >> 2,
        ((msg[5] & 3) << 4) | (msg[6] >> 4),
        ((msg[6] & 15) << 2) | (msg[7] >> 6),
        msg[7] & 63,
        msg[8] >> 2,
        ((msg[8] & 3) << 4) | (msg[9] >> 4),
        ((msg[9] & 15) << 2) | (msg[10] >> 6),
        msg[10] & 63,
    ];

    codes
        .iter()
        .map(|&c| AIS_CHARSET[c as usize] as char)
        .collect::<String>()
        .trim()
        .to_string()
}

/// DF17 type 19 subtype 1-2: ground velocity from signed east-west and
/// north-south components.
fn decode_velocity(msg: &[u8; LONG_MSG_BYTES]) -> Velocity {
    let ew_dir = (msg[5] & 4) >> 2;
    let ew_velocity = ((u16::from(msg[5]) & 3) << 8) | u16::from(msg[6]);
    let ns_dir = (msg[7] & 0x80) >> 7;
    let ns_velocity = ((u16::from(msg[7]) & 0x7f) << 3) | ((u16::from(msg[8]) & 0xe0) >> 5);
    let vert_rate_source = (msg[8] & 0x10) >> 4;
    let vert_rate_sign = (msg[8] & 0x8) >> 3;
    let vert_rate = ((u16::from(msg[8]) & 7) << 6) | ((u16::from(msg[9]) & 0xfc) >> 2);

    let (speed, heading) = if ew_velocity != 0 && ns_velocity != 0 {
        let speed = f64::from(
            u32::from(ns_velocity) * u32::from(ns_velocity)
                + u32::from(ew_velocity) * u32::from(ew_velocity),
        )
        .sqrt();

        let mut ewv = f64::from(ew_velocity);
        let mut nsv = f64::from(ns_velocity);
        if ew_dir != 0 {
            ewv = -ewv;
        }
        if ns_dir != 0 {
            nsv = -nsv;
        }

        let mut heading = ewv.atan2(nsv).to_degrees();
        if heading < 0.0 {
            heading += 360.0;
        }

        (Some(speed), Some(heading))
    } else {
        (None, None)
    };

    Velocity {
        ew_dir,
        ew_velocity,
        ns_dir,
        ns_velocity,
        vert_rate_source,
        vert_rate_sign,
        vert_rate,
        speed,
        heading,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adsb::crc;
    use approx::assert_relative_eq;

    fn decoder() -> Decoder {
        Decoder::new(true, true)
    }

    #[test]
    fn test_decode_df17_identification() {
        let msg = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        let mm = decoder().parse(&msg).unwrap();

        assert_eq!(mm.df, 17);
        assert_eq!(mm.bits, 112);
        assert_eq!(mm.icao, 0x4840D6);
        assert!(mm.crc_ok);
        assert_eq!(mm.repair, None);
        assert_eq!(mm.callsign.as_deref(), Some("KLM1023"));
        assert_eq!(mm.metype, 4);
        assert_eq!(mm.aircraft_type, Some(3));
    }

    #[test]
    fn test_decode_df17_airborne_position_raw_fields() {
        // Odd-frame airborne position example, TC=11.
        let msg = hex::decode("8D40621D58C386435CC412692AD6").unwrap();
        let mm = decoder().parse(&msg).unwrap();

        assert!(mm.crc_ok);
        assert_eq!(mm.df, 17);
        assert_eq!(mm.metype, 11);

        let pos = mm.raw_position.unwrap();
        assert!(pos.odd);
        assert_eq!(pos.latitude, 74158);
        assert_eq!(pos.longitude, 50194);

        let alt = mm.altitude.unwrap();
        assert_eq!(alt.unit, AltitudeUnit::Feet);
        assert_eq!(alt.value, 38000);
    }

    #[test]
    fn test_decode_df17_velocity() {
        // Ground speed example (TC=19, subtype 1).
        let msg = hex::decode("8D485020994409940838175B284F").unwrap();
        let mm = decoder().parse(&msg).unwrap();

        assert!(mm.crc_ok);
        assert_eq!(mm.metype, 19);
        assert_eq!(mm.mesub, 1);

        let v = mm.velocity.unwrap();
        assert_eq!(v.ew_dir, 1);
        assert_eq!(v.ew_velocity, 9);
        assert_eq!(v.ns_dir, 1);
        assert_eq!(v.ns_velocity, 160);
        assert_relative_eq!(v.speed.unwrap(), (9.0f64 * 9.0 + 160.0 * 160.0).sqrt(), epsilon = 1e-9);
        // Both components point south-west.
        let heading = v.heading.unwrap();
        assert!((180.0..270.0).contains(&heading), "heading {}", heading);
    }

    #[test]
    fn test_single_bit_repair_reported() {
        let mut msg = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        msg[5] ^= 1 << 3; // bit 44

        let mm = decoder().parse(&msg).unwrap();
        assert!(mm.crc_ok);
        assert_eq!(mm.repair, Some(Repair::SingleBit(44)));
        assert_eq!(mm.callsign.as_deref(), Some("KLM1023"));
    }

    #[test]
    fn test_two_bit_repair_requires_aggressive() {
        let mut msg = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        msg[5] ^= 1 << 3;
        msg[8] ^= 1 << 1;

        let mut conservative = Decoder::new(true, false);
        let mm = conservative.parse(&msg).unwrap();
        assert!(!mm.crc_ok);

        let mm = decoder().parse(&msg).unwrap();
        assert!(mm.crc_ok);
        assert_eq!(mm.repair, Some(Repair::TwoBits(44, 70)));
    }

    #[test]
    fn test_fix_errors_disabled_drops_corrupted_frame() {
        let mut msg = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        msg[5] ^= 1 << 3;

        let mut dec = Decoder::new(false, false);
        let mm = dec.parse(&msg).unwrap();
        assert!(!mm.crc_ok);
        assert_eq!(mm.repair, None);
    }

    #[test]
    fn test_brute_force_ap_accepts_cached_address() {
        let mut dec = decoder();

        // A confirmed DF17 squitter caches its address...
        let squitter = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        assert!(dec.parse(&squitter).unwrap().crc_ok);

        // ...then a DF4 altitude reply whose AP field overlays the same
        // address is accepted even though its CRC cannot match directly.
        let mut reply = [0u8; 7];
        reply[0] = 4 << 3;
        reply[2] = 0x1D; // arbitrary AC field content
        reply[3] = 0x90;
        let parity = crc::checksum(&reply, 56);
        let ap = parity ^ 0x4840D6;
        reply[4] = ((ap >> 16) & 0xff) as u8;
        reply[5] = ((ap >> 8) & 0xff) as u8;
        reply[6] = (ap & 0xff) as u8;

        let mm = dec.parse(&reply).unwrap();
        assert!(mm.crc_ok);
        assert_eq!(mm.df, 4);
        assert_eq!(mm.icao, 0x4840D6);
    }

    #[test]
    fn test_brute_force_ap_rejects_unknown_address() {
        let mut dec = decoder();

        let mut reply = [0u8; 7];
        reply[0] = 4 << 3;
        let parity = crc::checksum(&reply, 56);
        let ap = parity ^ 0xABCDEF; // never cached
        reply[4] = ((ap >> 16) & 0xff) as u8;
        reply[5] = ((ap >> 8) & 0xff) as u8;
        reply[6] = (ap & 0xff) as u8;

        let mm = dec.parse(&reply).unwrap();
        assert!(!mm.crc_ok);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut dec = decoder();
        assert_eq!(dec.parse(&[]), Err(ParseError::InvalidLength));
        // DF17 declares 112 bits but only 7 bytes are provided.
        let msg = hex::decode("8D4840D6202CC3").unwrap();
        assert_eq!(dec.parse(&msg), Err(ParseError::InvalidLength));
    }

    #[test]
    fn test_metric_altitude_placeholder() {
        let mut dec = decoder();

        // DF4 with the M-bit set: altitude is flagged metric but not decoded.
        let mut reply = [0u8; 7];
        reply[0] = 4 << 3;
        reply[3] = 1 << 6;
        let parity = crc::checksum(&reply, 56);
        let ap = parity ^ 0x4840D6;
        reply[4] = ((ap >> 16) & 0xff) as u8;
        reply[5] = ((ap >> 8) & 0xff) as u8;
        reply[6] = (ap & 0xff) as u8;

        // Seed the cache through a confirmed squitter first.
        let squitter = hex::decode("8D4840D6202CC371C32CE0576098").unwrap();
        dec.parse(&squitter).unwrap();

        let mm = dec.parse(&reply).unwrap();
        assert!(mm.crc_ok);
        assert_eq!(
            mm.altitude,
            Some(Altitude {
                value: 0,
                unit: AltitudeUnit::Meters
            })
        );
    }
}
