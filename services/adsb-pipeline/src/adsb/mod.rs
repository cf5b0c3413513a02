//! Mode S decoding collaborator
//!
//! Pure functions only: Downlink Format, CRC residual and a per-message
//! field decoder. Everything above this module treats it as an oracle.

mod crc;
mod parser;
mod types;

pub use crc::{downlink_format, icao, residual};
pub use parser::{decode_message, DecodeError};
pub use types::{DecodedMessage, DownlinkFormat};
