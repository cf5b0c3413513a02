//! Frame acquisition
//!
//! Every origin is normalised into a stream of timestamped frames. The
//! acquisition worker classifies each frame, batches the accepted ones and
//! hands batches to the next stage.

pub mod demod;
pub mod file;
pub mod hardware;
pub mod network;
pub mod process;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub use file::FileSource;
pub use hardware::HardwareSource;
pub use network::{BeastDecoder, NetDatatype, NetworkSource};
pub use process::{DecoderProcess, ExternalProcessSource, PROCESS_TERMINATE_TIMEOUT};

use crate::batcher::{FrameBatch, FrameBatcher, DEFAULT_ADSB_FLUSH_THRESHOLD};
use crate::error::{FrameError, SourceError, TransportError};
use crate::filter::{classify, FrameClass};
use crate::frame::FrameRecord;
use crate::supervisor::WorkerContext;
use crate::transport::ChannelSender;

/// One item read from an origin.
#[derive(Debug)]
pub enum Acquired {
    Frame(FrameRecord),
    /// A line that could not be turned into a frame. Dropped by the caller.
    Malformed(FrameError),
}

/// Text of one line read as raw bytes, without a trailing `\r`.
pub(crate) fn text_line(mut bytes: Vec<u8>) -> Result<String, FrameError> {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8(bytes).map_err(|_| FrameError::NotUtf8)
}

/// Where frames come from. Chosen once from configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameSource {
    File(FileSource),
    Network(NetworkSource),
    Hardware(HardwareSource),
    ExternalProcess(ExternalProcessSource),
}

impl fmt::Display for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSource::File(s) => write!(f, "file {}", s.path().display()),
            FrameSource::Network(s) => write!(f, "{} feed at {}", s.datatype, s.address()),
            FrameSource::Hardware(s) => f.write_str(&s.describe()),
            FrameSource::ExternalProcess(s) => write!(f, "`{}`", s.describe()),
        }
    }
}

/// Tuning for the acquisition loop.
#[derive(Debug, Clone)]
pub struct AcquisitionOptions {
    /// Flush a partial batch on this period. `None` keeps batches purely
    /// size-triggered.
    pub flush_interval: Option<Duration>,
    pub adsb_flush_threshold: usize,
    pub stats_interval: Duration,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            flush_interval: None,
            adsb_flush_threshold: DEFAULT_ADSB_FLUSH_THRESHOLD,
            stats_interval: Duration::from_secs(10),
        }
    }
}

/// Acquisition counters
#[derive(Debug, Default)]
pub struct SourceStats {
    frames_read: AtomicU64,
    adsb_accepted: AtomicU64,
    commb_accepted: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
    batches_sent: AtomicU64,
}

/// Point-in-time copy of [`SourceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub adsb_accepted: u64,
    pub commb_accepted: u64,
    pub rejected: u64,
    pub malformed: u64,
    pub batches_sent: u64,
}

impl StatsSnapshot {
    pub fn accepted(&self) -> u64 {
        self.adsb_accepted + self.commb_accepted
    }
}

impl SourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_class(&self, class: FrameClass) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        let counter = match class {
            FrameClass::LongSquitter => &self.adsb_accepted,
            FrameClass::CommB => &self.commb_accepted,
            FrameClass::Rejected(_) => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            adsb_accepted: self.adsb_accepted.load(Ordering::Relaxed),
            commb_accepted: self.commb_accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
        }
    }

    fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            "[Stats] frames={}, adsb={}, commb={}, rejected={}, malformed={}, batches={}",
            s.frames_read, s.adsb_accepted, s.commb_accepted, s.rejected, s.malformed, s.batches_sent
        );
    }
}

/// An opened origin.
enum SourceReader {
    File(file::FileReader),
    Network(network::NetworkReader),
    Hardware(hardware::HardwareReader),
    Process(DecoderProcess),
}

impl SourceReader {
    async fn next(&mut self) -> Result<Option<Acquired>, SourceError> {
        match self {
            SourceReader::File(r) => r.next().await,
            SourceReader::Network(r) => r.next().await,
            SourceReader::Hardware(r) => r.next().await,
            SourceReader::Process(r) => r.next().await,
        }
    }

    async fn close(self, timeout: Duration) {
        match self {
            SourceReader::Hardware(r) => r.close(timeout).await,
            SourceReader::Process(mut r) => {
                if let Err(e) = r.terminate(timeout).await {
                    warn!("Failed to stop decoder process: {}", e);
                }
            }
            SourceReader::File(_) | SourceReader::Network(_) => {}
        }
    }
}

enum Stop {
    Exhausted,
    Cancelled,
    Failed(anyhow::Error),
}

impl FrameSource {
    async fn open(&self) -> Result<SourceReader, SourceError> {
        Ok(match self {
            FrameSource::File(s) => SourceReader::File(s.open().await?),
            FrameSource::Network(s) => SourceReader::Network(s.open().await?),
            FrameSource::Hardware(s) => SourceReader::Hardware(s.open()?),
            FrameSource::ExternalProcess(s) => SourceReader::Process(s.spawn()?),
        })
    }

    /// Read, classify and batch frames until the origin ends, fails, or the
    /// worker is cancelled.
    ///
    /// End of a file is a normal exit; any other end of input is returned
    /// as an error. Whatever is still buffered is flushed on the way out.
    pub async fn run(
        self,
        output: ChannelSender<FrameBatch>,
        ctx: WorkerContext,
        options: AcquisitionOptions,
        stats: Arc<SourceStats>,
    ) -> anyhow::Result<()> {
        let mut reader = self.open().await.with_context(|| format!("opening {}", self))?;
        info!("Reading frames from {}", self);

        let mut batcher = FrameBatcher::with_threshold(options.adsb_flush_threshold);
        let mut flush_timer = options.flush_interval.map(periodic);
        let mut stats_timer = periodic(options.stats_interval);

        let stop = loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => break Stop::Cancelled,
                _ = tick(&mut flush_timer) => {
                    if let Some(batch) = batcher.take_partial() {
                        if let Err(stop) = forward(&output, batch, &ctx, &stats).await {
                            break stop;
                        }
                    }
                }
                _ = stats_timer.tick() => stats.log_summary(),
                item = reader.next() => match item {
                    Ok(Some(Acquired::Frame(record))) => {
                        let class = classify(record.frame());
                        stats.record_class(class);
                        if let FrameClass::Rejected(reason) = class {
                            debug!("Rejected {}: {:?}", record.frame(), reason);
                        }
                        if let Some(batch) = batcher.push(class, record) {
                            if let Err(stop) = forward(&output, batch, &ctx, &stats).await {
                                break stop;
                            }
                        }
                    }
                    Ok(Some(Acquired::Malformed(e))) => {
                        stats.record_malformed();
                        debug!("Dropped malformed input: {}", e);
                    }
                    Ok(None) => break Stop::Exhausted,
                    Err(e) => break Stop::Failed(anyhow::Error::new(e).context(format!("reading {}", self))),
                },
            }
        };

        if let Some(batch) = batcher.take_partial() {
            match stop {
                Stop::Exhausted => {
                    if forward(&output, batch, &ctx, &stats).await.is_err() {
                        warn!("Could not deliver the final partial batch");
                    }
                }
                _ => match output.try_send(batch) {
                    Ok(()) => stats.record_batch(),
                    Err(batch) => debug!("Dropped {} buffered frames at shutdown", batch.len()),
                },
            }
        }
        drop(output);

        reader.close(PROCESS_TERMINATE_TIMEOUT).await;
        stats.log_summary();

        match stop {
            Stop::Exhausted => {
                info!("{} exhausted", self);
                Ok(())
            }
            Stop::Cancelled => {
                info!("Stopped reading from {}", self);
                Ok(())
            }
            Stop::Failed(e) => Err(e),
        }
    }
}

fn periodic(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn forward(
    output: &ChannelSender<FrameBatch>,
    batch: FrameBatch,
    ctx: &WorkerContext,
    stats: &SourceStats,
) -> Result<(), Stop> {
    match output.send(batch, ctx.cancel_token()).await {
        Ok(()) => {
            stats.record_batch();
            Ok(())
        }
        Err(TransportError::Cancelled) => Err(Stop::Cancelled),
        Err(TransportError::Closed) => Err(Stop::Failed(
            anyhow::Error::new(TransportError::Closed).context("forwarding frame batch"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tokio_util::sync::CancellationToken;

    use crate::transport::{channel, failure_channel};

    const VALID_DF17: &str = "8D4840D6202CC371C32CE0576098";
    const VALID_DF17_B: &str = "8D40621D58C382D690C8AC2863A7";
    const DF20: &str = "A0001838CA3E51F0A8000047A6B6";

    fn context(cancel: CancellationToken) -> WorkerContext {
        let (failures, _rx) = failure_channel(4);
        WorkerContext::new("source", cancel, failures)
    }

    fn frames_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[tokio::test]
    async fn test_batches_flush_on_second_adsb_frame() {
        let file = frames_file(&[
            &format!("*{};", DF20),
            &format!("*{};", VALID_DF17),
            &format!("*{};", VALID_DF17_B),
            &format!("*{};", VALID_DF17),
        ]);
        let (tx, mut rx) = channel(8);
        let stats = Arc::new(SourceStats::new());

        FrameSource::File(FileSource::new(file.path()))
            .run(tx, context(CancellationToken::new()), AcquisitionOptions::default(), stats.clone())
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.adsb.len(), 2);
        assert_eq!(first.commb.len(), 1);
        assert_eq!(first.adsb[0].frame().as_str(), VALID_DF17);
        assert_eq!(first.adsb[1].frame().as_str(), VALID_DF17_B);

        // remainder flushed at end of file
        let last = rx.recv().await.unwrap();
        assert_eq!(last.adsb.len(), 1);
        assert!(rx.recv().await.is_none());

        assert_eq!(stats.snapshot().batches_sent, 2);
    }

    #[tokio::test]
    async fn test_counts_rejections() {
        let file = frames_file(&[
            "*8D4840D6202CC371C32CE0576099;",
            "*8D4840D6;",
            "*ZZ4840D6202CC371C32CE0576098;",
        ]);
        let (tx, mut rx) = channel(8);
        let stats = Arc::new(SourceStats::new());

        FrameSource::File(FileSource::new(file.path()))
            .run(tx, context(CancellationToken::new()), AcquisitionOptions::default(), stats.clone())
            .await
            .unwrap();

        assert!(rx.recv().await.is_none());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_read, 3);
        assert_eq!(snapshot.rejected, 3);
        assert_eq!(snapshot.accepted(), 0);
    }

    #[tokio::test]
    async fn test_flush_timer_releases_single_frames() {
        let (tx, mut rx) = channel(8);
        let source = FrameSource::ExternalProcess(ExternalProcessSource::new(
            "sh",
            vec!["-c".to_string(), format!("echo '*{};'; sleep 5", VALID_DF17)],
        ));
        let options = AcquisitionOptions {
            flush_interval: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(source.run(
            tx,
            context(cancel.clone()),
            options,
            Arc::new(SourceStats::new()),
        ));

        let batch = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.adsb.len(), 1);

        cancel.cancel();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_dropped_not_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(format!("*{};\n", VALID_DF17).as_bytes()).unwrap();
        file.write_all(b"*\xff\xfe;\n").unwrap();
        file.write_all(format!("*{};\n", VALID_DF17_B).as_bytes()).unwrap();
        let (tx, mut rx) = channel(8);
        let stats = Arc::new(SourceStats::new());

        FrameSource::File(FileSource::new(file.path()))
            .run(tx, context(CancellationToken::new()), AcquisitionOptions::default(), stats.clone())
            .await
            .unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.adsb.len(), 2);
        assert_eq!(batch.adsb[1].frame().as_str(), VALID_DF17_B);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.malformed, 1);
        assert_eq!(snapshot.adsb_accepted, 2);
    }

    #[test]
    fn test_text_line() {
        assert_eq!(text_line(b"*8D48;\r".to_vec()), Ok("*8D48;".to_string()));
        assert_eq!(text_line(vec![b'*', 0xff, b';']), Err(FrameError::NotUtf8));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let (tx, _rx) = channel(1);
        let result = FrameSource::File(FileSource::new("/nonexistent/frames.txt"))
            .run(
                tx,
                context(CancellationToken::new()),
                AcquisitionOptions::default(),
                Arc::new(SourceStats::new()),
            )
            .await;
        assert!(result.is_err());
    }
}
