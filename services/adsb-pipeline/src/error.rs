//! Error types shared across the pipeline

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A single frame or line that cannot be used. Always recovered locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("line is not valid UTF-8")]
    NotUtf8,
    #[error("frame `{0}` is not valid hex")]
    InvalidHex(String),
    #[error("invalid recorded timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// An origin that became unusable. Always escalated to the supervisor.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to spawn `{program}`")]
    Spawn { program: String, source: io::Error },

    #[error("failed to connect to {addr}")]
    Connect { addr: String, source: io::Error },

    #[error("error reading from {origin}")]
    Read { origin: String, source: io::Error },

    #[error("{origin} closed its output ({detail})")]
    Closed { origin: String, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("receiving side of the channel is closed")]
    Closed,
    #[error("send abandoned because the worker is shutting down")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },

    #[error("unsupported network datatype {0:?}, expected raw or beast")]
    UnsupportedDatatype(String),

    #[error("source {0:?} is neither rtlsdr, rtladsb, net nor an existing file")]
    UnknownSource(String),
}

/// Failure while recording one line. The recorder logs it and moves on.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("no log segment is open")]
    NoSegment,

    /// Printed inline rather than chained: diagnostics go into the log
    /// segment with plain `Display`.
    #[error("failed to write log segment: {0}")]
    Io(io::Error),
}

impl From<io::Error> for RecordError {
    fn from(e: io::Error) -> Self {
        RecordError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_causes_are_reported_once() {
        let err = SourceError::Read {
            origin: "frames.txt".to_string(),
            source: io::Error::new(io::ErrorKind::InvalidData, "stream did not contain valid UTF-8"),
        };
        let chain = format!("{:#}", anyhow::Error::new(err));
        assert_eq!(chain, "error reading from frames.txt: stream did not contain valid UTF-8");

        let err = RecordError::from(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(format!("{:#}", anyhow::Error::new(err)), "failed to write log segment: disk full");
    }
}
