//! Replay of recorded frame files

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;

use super::{text_line, Acquired};
use crate::error::{FrameError, SourceError};
use crate::frame::{FrameRecord, RawFrame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn open(&self) -> Result<FileReader, SourceError> {
        let file = File::open(&self.path).await.map_err(|source| SourceError::Open {
            path: self.path.clone(),
            source,
        })?;

        Ok(FileReader {
            lines: SplitStream::new(BufReader::new(file).split(b'\n')),
            origin: self.path.display().to_string(),
        })
    }
}

pub(crate) struct FileReader {
    lines: SplitStream<BufReader<File>>,
    origin: String,
}

impl FileReader {
    /// Next frame, or `None` at end of file.
    pub(crate) async fn next(&mut self) -> Result<Option<Acquired>, SourceError> {
        while let Some(line) = self.lines.next().await {
            let bytes = line.map_err(|source| SourceError::Read {
                origin: self.origin.clone(),
                source,
            })?;
            let line = match text_line(bytes) {
                Ok(line) => line,
                Err(e) => return Ok(Some(Acquired::Malformed(e))),
            };
            if line.starts_with('#') {
                continue;
            }
            if let Some(item) = parse_line(&line) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

/// Bare `*<hex>;` lines are stamped with the read time. Recorder output
/// (`<unix_ts>\t<line>`) keeps the time it was recorded with.
fn parse_line(line: &str) -> Option<Acquired> {
    let Some((ts, rest)) = line.split_once('\t') else {
        return RawFrame::from_line(line).map(|frame| Acquired::Frame(FrameRecord::now(frame)));
    };

    let received_at = ts
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite())
        .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0).round() as i64).single());
    let Some(received_at) = received_at else {
        return Some(Acquired::Malformed(FrameError::InvalidTimestamp(ts.to_string())));
    };

    RawFrame::from_line(rest).map(|frame| Acquired::Frame(FrameRecord::at(frame, received_at)))
}
