//! Frame validity filter
//!
//! Long squitters (DF17/18) must pass the CRC. Comm-B replies (DF20/21) are
//! accepted on format alone: their parity field is overlaid with the
//! interrogated address, so a zero residual is not expected at this layer.

use crate::adsb;
use crate::frame::RawFrame;

/// Shortest hex length handled: one 112-bit message.
pub const MIN_FRAME_HEX_LEN: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooShort(usize),
    InvalidHex,
    CrcFailed(u32),
    UnsupportedFormat(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    LongSquitter,
    CommB,
    Rejected(RejectReason),
}

impl FrameClass {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, FrameClass::Rejected(_))
    }
}

/// Classify a frame. Pure and stateless.
pub fn classify(frame: &RawFrame) -> FrameClass {
    let len = frame.hex_len();
    if len < MIN_FRAME_HEX_LEN {
        return FrameClass::Rejected(RejectReason::TooShort(len));
    }

    let Ok(bytes) = frame.to_bytes() else {
        return FrameClass::Rejected(RejectReason::InvalidHex);
    };

    match adsb::downlink_format(&bytes) {
        17 | 18 => match adsb::residual(&bytes) {
            0 => FrameClass::LongSquitter,
            residual => FrameClass::Rejected(RejectReason::CrcFailed(residual)),
        },
        20 | 21 => FrameClass::CommB,
        df => FrameClass::Rejected(RejectReason::UnsupportedFormat(df)),
    }
}
