use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use adsb_pipeline::pipeline::{decode, Display, DisplayFormat};
use adsb_pipeline::source::{
    AcquisitionOptions, ExternalProcessSource, FileSource, FrameSource, SourceStats,
};
use adsb_pipeline::supervisor::{ExitReason, ShutdownCause, Supervisor, SupervisorConfig};
use adsb_pipeline::{channel, FrameBatch};

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        poll_interval: Duration::from_millis(5),
        termination_timeout: Duration::from_millis(500),
        kill_timeout: Duration::from_millis(200),
    }
}

fn no_interrupts() -> tokio::sync::mpsc::Receiver<()> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);
    // keep the sender alive so the channel never reports closed
    std::mem::forget(tx);
    rx
}

#[tokio::test]
async fn test_file_source_accepts_one_and_rejects_one() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "*8D4840D6202CC371C32CE0576098;").unwrap();
    writeln!(file, "*00000000000000000000000000;").unwrap();

    let (batch_tx, mut batch_rx) = channel::<FrameBatch>(8);
    let stats = Arc::new(SourceStats::new());
    let worker_stats = stats.clone();
    let source = FrameSource::File(FileSource::new(file.path()));

    let mut supervisor = Supervisor::new(fast_config());
    supervisor.spawn("source", move |ctx| {
        source.run(batch_tx, ctx, AcquisitionOptions::default(), worker_stats)
    });
    let report = supervisor.run(no_interrupts()).await;

    assert_eq!(report.cause, ShutdownCause::WorkerExited("source".to_string()));
    assert!(report.failures.is_empty());
    assert_eq!(report.exit_code(), 0);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.accepted(), 1);
    assert_eq!(snapshot.rejected, 1);

    let batch = batch_rx.recv().await.unwrap();
    assert_eq!(batch.adsb.len(), 1);
    assert_eq!(batch.adsb[0].frame().as_str(), "8D4840D6202CC371C32CE0576098");
    assert!(batch.commb.is_empty());
    assert!(batch_rx.recv().await.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_exiting_decoder_is_one_failure_and_no_frames() {
    let (batch_tx, mut batch_rx) = channel::<FrameBatch>(8);
    let stats = Arc::new(SourceStats::new());
    let worker_stats = stats.clone();
    let source = FrameSource::ExternalProcess(ExternalProcessSource::new("true", Vec::new()));

    let mut supervisor = Supervisor::new(fast_config());
    supervisor.spawn("source", move |ctx| {
        source.run(batch_tx, ctx, AcquisitionOptions::default(), worker_stats)
    });
    let report = supervisor.run(no_interrupts()).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].worker, "source");
    assert_eq!(report.exit_code(), 1);
    assert!(matches!(report.exit_reason("source"), Some(ExitReason::Failed(_))));

    assert_eq!(stats.snapshot().frames_read, 0);
    assert!(batch_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_live_pipeline_drains_to_display() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in [
        "# recorded 2024-03-01",
        "*8D4840D6202CC371C32CE0576098;",
        "*A800080010030A80F6000054EDF5;",
        "*8D40621D58C382D690C8AC2863A7;",
        "*8D485020994409940838175B284F;",
    ] {
        writeln!(file, "{}", line).unwrap();
    }

    let (batch_tx, batch_rx) = channel(4);
    let (message_tx, message_rx) = channel(16);
    let (out_tx, mut out_rx) = tokio::io::duplex(64 * 1024);
    let source = FrameSource::File(FileSource::new(file.path()));
    let display = Display::new(out_tx, DisplayFormat::Json);

    let mut supervisor = Supervisor::new(fast_config());
    supervisor.spawn("source", move |ctx| {
        source.run(batch_tx, ctx, AcquisitionOptions::default(), Arc::new(SourceStats::new()))
    });
    supervisor.spawn("decode", move |ctx| decode::run(batch_rx, message_tx, ctx));
    supervisor.spawn("display", move |ctx| display.run(message_rx, ctx));
    let report = supervisor.run(no_interrupts()).await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.exit_reason("display"), Some(&ExitReason::Terminated));

    let mut output = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut out_rx, &mut output)
        .await
        .unwrap();
    let dfs: Vec<u64> = output
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["df"].as_u64().unwrap())
        .collect();
    assert_eq!(dfs, vec![17, 21, 17, 17]);
}
