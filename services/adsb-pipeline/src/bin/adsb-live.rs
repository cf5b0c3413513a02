//! Live ADS-B pipeline
//!
//! Reads frames from the configured source, decodes them and prints one line
//! per message. Source, decode and display run as supervised workers; the
//! first failure stops all of them.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use adsb_pipeline::config::LiveConfig;
use adsb_pipeline::pipeline::{decode, Display};
use adsb_pipeline::source::SourceStats;
use adsb_pipeline::supervisor::{interrupt_channel, Supervisor};
use adsb_pipeline::{channel, logging};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    info!("===========================================");
    info!("   ADS-B Live Pipeline");
    info!("===========================================");

    let config = LiveConfig::from_env(std::env::args().nth(1)).context("loading configuration")?;

    info!("Configuration:");
    info!("  Source: {}", config.source);
    info!("  Display format: {:?}", config.display_format);
    info!("  Channel capacity: {}", config.channel_capacity);
    if let Some(interval) = config.acquisition.flush_interval {
        info!("  Batch flush interval: {:?}", interval);
    }

    let interrupts = interrupt_channel();
    let (batch_tx, batch_rx) = channel(config.channel_capacity);
    let (message_tx, message_rx) = channel(config.message_capacity());
    let stats = Arc::new(SourceStats::new());

    let mut supervisor = Supervisor::new(config.supervisor.clone());

    let source = config.source.clone();
    let acquisition = config.acquisition.clone();
    supervisor.spawn("source", move |ctx| source.run(batch_tx, ctx, acquisition, stats));
    supervisor.spawn("decode", move |ctx| decode::run(batch_rx, message_tx, ctx));
    let display = Display::new(tokio::io::stdout(), config.display_format);
    supervisor.spawn("display", move |ctx| display.run(message_rx, ctx));

    info!("Press Ctrl+C to stop.");
    let report = supervisor.run(interrupts).await;

    let code = report.exit_code();
    info!("Shutdown complete ({:?}), exit status {}", report.cause, code);
    std::process::exit(code);
}
