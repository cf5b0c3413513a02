//! Mode S message types

use serde::Serialize;

/// Downlink format identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DownlinkFormat {
    ShortAirSurveillance = 0,
    AltitudeReply = 4,
    IdentityReply = 5,
    AllCallReply = 11,
    LongAirSurveillance = 16,
    ExtendedSquitter = 17,
    ExtendedSquitterNonTransponder = 18,
    MilitaryExtendedSquitter = 19,
    CommBAltitude = 20,
    CommBIdentity = 21,
    Unknown = 255,
}

impl From<u8> for DownlinkFormat {
    fn from(df: u8) -> Self {
        match df {
            0 => Self::ShortAirSurveillance,
            4 => Self::AltitudeReply,
            5 => Self::IdentityReply,
            11 => Self::AllCallReply,
            16 => Self::LongAirSurveillance,
            17 => Self::ExtendedSquitter,
            18 => Self::ExtendedSquitterNonTransponder,
            19 => Self::MilitaryExtendedSquitter,
            20 => Self::CommBAltitude,
            21 => Self::CommBIdentity,
            _ => Self::Unknown,
        }
    }
}

/// Fields decoded from a single Mode S message.
///
/// Only what one message carries on its own; nothing is aggregated across
/// messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecodedMessage {
    /// Arrival time, seconds since the Unix epoch
    pub timestamp: f64,

    /// ICAO 24-bit address. For address/parity formats this is recovered
    /// from the CRC residual.
    pub icao_address: u32,

    /// Downlink format
    pub df: u8,

    /// Type code (DF17/18 only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tc: Option<u8>,

    /// Flight callsign (8 characters max)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,

    /// Altitude in feet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_ft: Option<i32>,

    /// Ground speed or airspeed in knots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kts: Option<f32>,

    /// Track or heading in degrees (0-360)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f32>,

    /// Vertical rate in feet per minute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_rate_fpm: Option<i32>,

    /// Squawk code as four octal digits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squawk: Option<u16>,

    /// Raw hex of the message
    pub raw: String,
}
