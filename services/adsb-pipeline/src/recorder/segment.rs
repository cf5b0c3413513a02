//! Append-only log segments

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};

use crate::frame::unix_seconds;

const SEGMENT_BUFFER_BYTES: usize = 1 << 20;
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// One log file covering `[opened_at, opened_at + period)`.
pub struct LogSegment {
    path: PathBuf,
    opened_at: DateTime<Local>,
    period: Duration,
    out: BufWriter<File>,
    lines: u64,
}

impl LogSegment {
    /// `<prefix><ISO-8601 time>` with `:` replaced by `.`. The prefix may
    /// contain directories.
    pub fn file_name(prefix: &str, opened_at: &DateTime<Local>) -> PathBuf {
        let stamp = opened_at.format(ISO_FORMAT).to_string().replace(':', ".");
        PathBuf::from(format!("{}{}", prefix, stamp))
    }

    /// Create the file and write the header: the opening time as a comment,
    /// then the optional free-text comment.
    pub fn create(
        prefix: &str,
        opened_at: DateTime<Local>,
        period: Duration,
        comment: Option<&str>,
    ) -> io::Result<Self> {
        let path = Self::file_name(prefix, &opened_at);
        let file = File::create(&path)?;
        let mut out = BufWriter::with_capacity(SEGMENT_BUFFER_BYTES, file);

        writeln!(out, "# {}", opened_at.format(ISO_FORMAT))?;
        if let Some(comment) = comment {
            for line in comment.lines() {
                writeln!(out, "# {}", line)?;
            }
        }
        out.flush()?;

        Ok(Self {
            path,
            opened_at,
            period,
            out,
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn opened_at(&self) -> DateTime<Local> {
        self.opened_at
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Whether a record stamped `at` belongs in this segment.
    pub fn covers(&self, at: &DateTime<Local>) -> bool {
        at.signed_duration_since(self.opened_at) < self.period
    }

    /// `<unix seconds to the millisecond>\t<line>`
    pub fn append(&mut self, at: &DateTime<Local>, line: &str) -> io::Result<()> {
        writeln!(self.out, "{:.3}\t{}", unix_seconds(at), line)?;
        self.lines += 1;
        Ok(())
    }

    pub fn comment(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "# {}", text)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Flush, sync and release the file.
    pub fn close(self) -> io::Result<PathBuf> {
        let file = self.out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn prefix(dir: &tempfile::TempDir) -> String {
        format!("{}/adsb_logfile_", dir.path().display())
    }

    #[test]
    fn test_file_name_has_no_colons() {
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 34, 56).unwrap();
        let name = LogSegment::file_name("adsb_logfile_", &at);
        assert_eq!(name, PathBuf::from("adsb_logfile_2024-03-01T12.34.56.000000"));
    }

    #[test]
    fn test_header_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut segment =
            LogSegment::create(&prefix(&dir), at, Duration::days(1), Some("roof antenna")).unwrap();

        segment.append(&at, "*8D4840D6202CC371C32CE0576098;").unwrap();
        assert_eq!(segment.lines(), 1);
        let path = segment.close().unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "# 2024-03-01T12:00:00.000000");
        assert_eq!(lines[1], "# roof antenna");
        assert_eq!(
            lines[2],
            format!("{:.3}\t*8D4840D6202CC371C32CE0576098;", at.timestamp() as f64)
        );
    }

    #[test]
    fn test_covers_half_open_window() {
        let dir = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let segment = LogSegment::create(&prefix(&dir), at, Duration::seconds(86400), None).unwrap();

        assert!(segment.covers(&at));
        assert!(segment.covers(&(at + Duration::seconds(86399))));
        assert!(!segment.covers(&(at + Duration::seconds(86400))));
    }
}
