//! Raw frames and their local arrival timestamps

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::FrameError;

/// Local receive time of a frame.
pub type Timestamp = DateTime<Utc>;

/// Seconds since the Unix epoch with sub-second precision.
pub fn unix_seconds<Tz: TimeZone>(ts: &DateTime<Tz>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

/// Hex payload of one Mode S message, framing markers removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawFrame(String);

impl RawFrame {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Strip line endings, the `*` prefix and the `;` suffix from a source
    /// line. Returns `None` when nothing is left.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let body = line.strip_prefix('*').unwrap_or(line);
        let body = body.strip_suffix(';').unwrap_or(body);

        if body.is_empty() {
            None
        } else {
            Some(Self(body.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hex_len(&self) -> usize {
        self.0.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        hex::decode(&self.0).map_err(|_| FrameError::InvalidHex(self.0.clone()))
    }
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A frame paired with the moment it arrived. Immutable once built; moved
/// from stage to stage.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    frame: RawFrame,
    received_at: Timestamp,
}

impl FrameRecord {
    /// Stamp a frame with the current time.
    pub fn now(frame: RawFrame) -> Self {
        Self::at(frame, Utc::now())
    }

    pub fn at(frame: RawFrame, received_at: Timestamp) -> Self {
        Self { frame, received_at }
    }

    pub fn frame(&self) -> &RawFrame {
        &self.frame
    }

    pub fn received_at(&self) -> Timestamp {
        self.received_at
    }
}
