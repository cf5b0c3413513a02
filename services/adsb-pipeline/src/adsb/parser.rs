//! Mode S message decoder

use thiserror::Error;

use super::crc::{downlink_format, icao, residual};
use super::types::{DecodedMessage, DownlinkFormat};

/// Callsign character lookup table
const CALLSIGN_CHARS: &[u8; 64] = b"#ABCDEFGHIJKLMNOPQRSTUVWXYZ##### ###############0123456789######";

/// Decode error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message is {0} bytes, expected 7 or 14")]
    InvalidLength(usize),
    #[error("downlink format {0} is not decoded")]
    UnsupportedFormat(u8),
}

/// Decode one Mode S message.
///
/// Parity is not checked here: callers hand over frames that already went
/// through the frame filter.
pub fn decode_message(msg: &[u8], timestamp: f64) -> Result<DecodedMessage, DecodeError> {
    let len = msg.len();
    if len != 7 && len != 14 {
        return Err(DecodeError::InvalidLength(len));
    }

    let df = downlink_format(msg);
    let mut decoded = DecodedMessage {
        timestamp,
        df,
        raw: hex::encode_upper(msg),
        ..Default::default()
    };

    match DownlinkFormat::from(df) {
        DownlinkFormat::ExtendedSquitter | DownlinkFormat::ExtendedSquitterNonTransponder => {
            if len != 14 {
                return Err(DecodeError::InvalidLength(len));
            }
            decoded.icao_address = icao(msg);
            decode_extended_squitter(msg, &mut decoded);
        }

        DownlinkFormat::ShortAirSurveillance
        | DownlinkFormat::AltitudeReply
        | DownlinkFormat::LongAirSurveillance
        | DownlinkFormat::CommBAltitude => {
            decoded.icao_address = residual(msg);
            decoded.altitude_ft = decode_ac13_altitude(ac13_field(msg));
        }

        DownlinkFormat::IdentityReply | DownlinkFormat::CommBIdentity => {
            decoded.icao_address = residual(msg);
            decoded.squawk = Some(decode_squawk(msg));
        }

        DownlinkFormat::AllCallReply => {
            decoded.icao_address = icao(msg);
        }

        _ => return Err(DecodeError::UnsupportedFormat(df)),
    }

    Ok(decoded)
}

fn decode_extended_squitter(msg: &[u8], decoded: &mut DecodedMessage) {
    // Type code from first 5 bits of ME field
    let tc = (msg[4] >> 3) & 0x1F;
    decoded.tc = Some(tc);

    match tc {
        1..=4 => decoded.callsign = Some(decode_callsign(msg)),
        // Airborne position, barometric (9-18) or GNSS (20-22) altitude
        9..=18 | 20..=22 => {
            let ac12 = ((msg[5] as u16) << 4) | ((msg[6] >> 4) as u16 & 0x0F);
            decoded.altitude_ft = decode_ac12_altitude(ac12);
        }
        19 => decode_airborne_velocity(msg, decoded),
        _ => {}
    }
}

fn ac13_field(msg: &[u8]) -> u16 {
    ((msg[2] as u16 & 0x1F) << 8) | msg[3] as u16
}

/// Decode altitude from 13-bit AC code; only 25 ft (Q=1) encoding is handled
fn decode_ac13_altitude(ac13: u16) -> Option<i32> {
    let m_bit = (ac13 >> 6) & 1;
    let q_bit = (ac13 >> 4) & 1;
    if ac13 == 0 || m_bit == 1 || q_bit == 0 {
        return None;
    }

    let n = ((ac13 & 0x1F80) >> 2) | ((ac13 & 0x0020) >> 1) | (ac13 & 0x000F);
    Some(n as i32 * 25 - 1000)
}

/// Decode altitude from 12-bit AC code
fn decode_ac12_altitude(ac12: u16) -> Option<i32> {
    let q_bit = (ac12 >> 4) & 1;
    if ac12 == 0 || q_bit == 0 {
        return None;
    }

    let n = ((ac12 & 0x0FE0) >> 1) | (ac12 & 0x000F);
    Some(n as i32 * 25 - 1000)
}

/// Decode callsign from type codes 1-4
fn decode_callsign(msg: &[u8]) -> String {
    let chars = [
        (msg[5] >> 2) & 0x3F,
        ((msg[5] & 0x03) << 4) | ((msg[6] >> 4) & 0x0F),
        ((msg[6] & 0x0F) << 2) | ((msg[7] >> 6) & 0x03),
        msg[7] & 0x3F,
        (msg[8] >> 2) & 0x3F,
        ((msg[8] & 0x03) << 4) | ((msg[9] >> 4) & 0x0F),
        ((msg[9] & 0x0F) << 2) | ((msg[10] >> 6) & 0x03),
        msg[10] & 0x3F,
    ];

    let callsign: String = chars
        .iter()
        .map(|&c| CALLSIGN_CHARS[c as usize] as char)
        .collect();

    callsign.trim_end_matches([' ', '#']).to_string()
}

/// Decode airborne velocity (type code 19)
fn decode_airborne_velocity(msg: &[u8], decoded: &mut DecodedMessage) {
    let subtype = msg[4] & 0x07;

    match subtype {
        1 | 2 => {
            // Ground speed from east-west / north-south components
            let dew = ((msg[5] >> 2) & 1) == 1;
            let vew = ((msg[5] as i32 & 0x03) << 8) | msg[6] as i32;
            let dns = ((msg[7] >> 7) & 1) == 1;
            let vns = ((msg[7] as i32 & 0x7F) << 3) | ((msg[8] >> 5) as i32 & 0x07);

            if vew > 0 && vns > 0 {
                let multiplier = if subtype == 2 { 4 } else { 1 };
                let mut v_ew = (vew - 1) * multiplier;
                let mut v_ns = (vns - 1) * multiplier;
                if dew {
                    v_ew = -v_ew;
                }
                if dns {
                    v_ns = -v_ns;
                }

                let speed = ((v_ew * v_ew + v_ns * v_ns) as f64).sqrt() as f32;
                let mut heading = (v_ew as f64).atan2(v_ns as f64).to_degrees() as f32;
                if heading < 0.0 {
                    heading += 360.0;
                }

                decoded.speed_kts = Some(speed);
                decoded.heading_deg = Some(heading);
            }
        }
        3 | 4 => {
            // Airspeed with magnetic heading
            let hdg_avail = ((msg[5] >> 2) & 1) == 1;
            let hdg = ((msg[5] as u16 & 0x03) << 8) | msg[6] as u16;
            if hdg_avail {
                decoded.heading_deg = Some(hdg as f32 * 360.0 / 1024.0);
            }

            let airspeed = ((msg[7] as u16 & 0x7F) << 3) | ((msg[8] >> 5) as u16 & 0x07);
            if airspeed > 0 {
                let multiplier = if subtype == 4 { 4 } else { 1 };
                decoded.speed_kts = Some(((airspeed - 1) * multiplier) as f32);
            }
        }
        _ => return,
    }

    let vr_sign = ((msg[8] >> 3) & 1) == 1;
    let vr = ((msg[8] as i32 & 0x07) << 6) | ((msg[9] >> 2) as i32 & 0x3F);
    if vr > 0 {
        let rate = (vr - 1) * 64;
        decoded.vertical_rate_fpm = Some(if vr_sign { -rate } else { rate });
    }
}

/// Decode squawk from the 13-bit identity field (Gillham interleaved)
fn decode_squawk(msg: &[u8]) -> u16 {
    let id13 = ac13_field(msg);
    let bit = |mask: u16, weight: u16| if id13 & mask != 0 { weight } else { 0 };

    let a = bit(0x0800, 1) + bit(0x0200, 2) + bit(0x0080, 4);
    let b = bit(0x0020, 1) + bit(0x0008, 2) + bit(0x0002, 4);
    let c = bit(0x1000, 1) + bit(0x0400, 2) + bit(0x0100, 4);
    let d = bit(0x0010, 1) + bit(0x0004, 2) + bit(0x0001, 4);

    a * 1000 + b * 100 + c * 10 + d
}
