//! Rotating recorder
//!
//! Reads decoder output line by line, stamps each line with its arrival
//! time and appends it to the current log segment. Segments are rotated
//! after a fixed span of runtime, at which point the decoder process is
//! restarted as well.

mod clock;
mod segment;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncWriteExt, BufWriter, Stdout};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use segment::LogSegment;

use crate::error::{ConfigError, FrameError, RecordError};
use crate::filter::{classify, FrameClass};
use crate::frame::RawFrame;
use crate::source::{DecoderProcess, ExternalProcessSource, PROCESS_TERMINATE_TIMEOUT};
use crate::supervisor::WorkerContext;

/// Which lines reach the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFilter {
    /// Every line, unmodified
    #[default]
    All,
    /// Lines whose frame passes the frame filter (ADS-B or Comm-B)
    Valid,
    /// Only CRC-checked long squitters
    AdsbOnly,
}

impl RecordFilter {
    pub fn admits(&self, class: FrameClass) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::Valid => class.is_accepted(),
            RecordFilter::AdsbOnly => class == FrameClass::LongSquitter,
        }
    }
}

impl FromStr for RecordFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(RecordFilter::All),
            "valid" => Ok(RecordFilter::Valid),
            "adsb" => Ok(RecordFilter::AdsbOnly),
            _ => Err(ConfigError::Invalid {
                var: "RECORD_FILTER",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub prefix: String,
    pub comment: Option<String>,
    pub filter: RecordFilter,
    pub rotation: Duration,
    /// Pause between stopping the decoder and starting it again on rotation
    pub restart_delay: Duration,
    /// Copy every logged line to stdout
    pub echo: bool,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            prefix: "adsb_logfile_".to_string(),
            comment: None,
            filter: RecordFilter::All,
            rotation: Duration::from_secs(86400),
            restart_delay: Duration::from_secs(2),
            echo: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Written,
    Filtered,
    /// The line belongs to the next segment; nothing was written.
    RotationDue,
}

pub struct RotatingRecorder<C: Clock = SystemClock> {
    options: RecorderOptions,
    clock: C,
    segment: Option<LogSegment>,
    last_flush: chrono::DateTime<chrono::Local>,
    written: u64,
    filtered: u64,
    errors: u64,
}

impl<C: Clock> RotatingRecorder<C> {
    pub fn new(options: RecorderOptions, clock: C) -> Self {
        let last_flush = clock.now();
        Self {
            options,
            clock,
            segment: None,
            last_flush,
            written: 0,
            filtered: 0,
            errors: 0,
        }
    }

    pub fn segment(&self) -> Option<&LogSegment> {
        self.segment.as_ref()
    }

    fn rotation_period(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.options.rotation)
            .unwrap_or_else(|_| chrono::Duration::days(365_000))
    }

    /// Open a fresh segment starting now. Any current segment is closed
    /// first.
    pub fn open_segment(&mut self) -> Result<PathBuf, RecordError> {
        self.close_segment();

        let now = self.clock.now();
        let segment = LogSegment::create(
            &self.options.prefix,
            now,
            self.rotation_period(),
            self.options.comment.as_deref(),
        )?;
        info!("Logging to {}", segment.path().display());
        let path = segment.path().to_path_buf();
        self.segment = Some(segment);
        self.last_flush = now;
        Ok(path)
    }

    /// Close the current segment and open the next one.
    pub fn rotate(&mut self) -> Result<PathBuf, RecordError> {
        info!("Rotating log segment");
        self.open_segment()
    }

    pub fn rotation_due(&self) -> bool {
        let now = self.clock.now();
        self.segment.as_ref().is_some_and(|s| !s.covers(&now))
    }

    /// Stamp and log one raw line.
    ///
    /// The line is checked against the current segment's window before
    /// anything is written, so a line that arrives after the boundary never
    /// lands in the old segment.
    pub fn record_line(&mut self, line: &[u8]) -> Result<LineOutcome, RecordError> {
        let now = self.clock.now();
        let segment = self.segment.as_mut().ok_or(RecordError::NoSegment)?;
        if !segment.covers(&now) {
            return Ok(LineOutcome::RotationDue);
        }

        let text = std::str::from_utf8(line).map_err(|_| FrameError::NotUtf8)?;
        let text = text.trim_end();

        if self.options.filter != RecordFilter::All {
            let admitted = RawFrame::from_line(text)
                .map(|frame| self.options.filter.admits(classify(&frame)))
                .unwrap_or(false);
            if !admitted {
                self.filtered += 1;
                return Ok(LineOutcome::Filtered);
            }
        }

        segment.append(&now, text)?;
        self.written += 1;

        if now.signed_duration_since(self.last_flush) >= chrono::Duration::seconds(1) {
            segment.flush()?;
            self.last_flush = now;
        }
        Ok(LineOutcome::Written)
    }

    /// Best-effort note in the log about a line that could not be recorded.
    pub fn write_diagnostic(&mut self, error: &RecordError) {
        self.errors += 1;
        if let Some(segment) = self.segment.as_mut() {
            let _ = segment.comment(&format!("error: {}", error));
        }
    }

    pub fn flush(&mut self) -> Result<(), RecordError> {
        if let Some(segment) = self.segment.as_mut() {
            segment.flush()?;
        }
        self.last_flush = self.clock.now();
        Ok(())
    }

    fn close_segment(&mut self) {
        let Some(segment) = self.segment.take() else {
            return;
        };
        let lines = segment.lines();
        match segment.close() {
            Ok(path) => info!("Closed {} ({} lines)", path.display(), lines),
            Err(e) => warn!("Failed to close log segment: {}", e),
        }
    }

    /// Record the output of `source` until cancelled.
    ///
    /// The decoder exiting on its own is a failure. Errors on single lines
    /// are logged and recorded as comments; they never stop the recorder.
    pub async fn run(mut self, source: ExternalProcessSource, ctx: WorkerContext) -> anyhow::Result<()> {
        self.open_segment().context("opening first log segment")?;
        let mut process = source.spawn()?;

        let mut stdout = BufWriter::new(tokio::io::stdout());
        let mut flush_timer = interval_at(Instant::now() + Duration::from_secs(1), Duration::from_secs(1));
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break Ok(()),
                _ = flush_timer.tick() => {
                    if self.rotation_due() {
                        match self.rotate_and_restart(process, &source, &ctx, None, &mut stdout).await {
                            Ok(Some(next)) => process = next,
                            Ok(None) => return self.finish(Ok(())),
                            Err(e) => return self.finish(Err(e)),
                        }
                        continue;
                    }
                    if let Err(e) = self.flush() {
                        warn!("Failed to flush log segment: {}", e);
                    }
                    if let Err(e) = stdout.flush().await {
                        debug!("Failed to flush stdout: {}", e);
                    }
                }
                line = process.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break Err(anyhow::Error::new(process.closed_error().await)),
                        Err(e) => break Err(anyhow::Error::new(e)),
                    };

                    if self.handle_line(&line, &mut stdout).await == LineOutcome::RotationDue {
                        match self.rotate_and_restart(process, &source, &ctx, Some(&line), &mut stdout).await {
                            Ok(Some(next)) => process = next,
                            Ok(None) => return self.finish(Ok(())),
                            Err(e) => return self.finish(Err(e)),
                        }
                    }
                }
            }
        };

        if let Err(e) = process.terminate(PROCESS_TERMINATE_TIMEOUT).await {
            warn!("Failed to stop {}: {}", source.describe(), e);
        }
        let _ = stdout.flush().await;
        self.finish(result)
    }

    async fn handle_line(&mut self, line: &[u8], stdout: &mut BufWriter<Stdout>) -> LineOutcome {
        match self.record_line(line) {
            Ok(LineOutcome::Written) => {
                if self.options.echo {
                    let _ = stdout.write_all(line).await;
                    let _ = stdout.write_all(b"\n").await;
                }
                LineOutcome::Written
            }
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Could not record line: {}", e);
                self.write_diagnostic(&e);
                LineOutcome::Filtered
            }
        }
    }

    /// Start the next segment, log the line that crossed the boundary into
    /// it, then restart the decoder. `None` when cancelled while waiting.
    async fn rotate_and_restart(
        &mut self,
        mut process: DecoderProcess,
        source: &ExternalProcessSource,
        ctx: &WorkerContext,
        pending: Option<&[u8]>,
        stdout: &mut BufWriter<Stdout>,
    ) -> anyhow::Result<Option<DecoderProcess>> {
        self.rotate().context("rotating log segment")?;
        if let Some(line) = pending {
            self.handle_line(line, stdout).await;
        }

        if let Err(e) = process.terminate(PROCESS_TERMINATE_TIMEOUT).await {
            warn!("Failed to stop {}: {}", source.describe(), e);
        }
        drop(process);

        tokio::select! {
            _ = ctx.cancelled() => return Ok(None),
            _ = tokio::time::sleep(self.options.restart_delay) => {}
        }
        Ok(Some(source.spawn()?))
    }

    fn finish(&mut self, result: anyhow::Result<()>) -> anyhow::Result<()> {
        self.close_segment();
        info!(
            "Recorder stopped: {} written, {} filtered, {} errors",
            self.written, self.filtered, self.errors
        );
        result
    }
}
