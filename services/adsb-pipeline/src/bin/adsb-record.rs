//! ADS-B recorder
//!
//! Runs `rtl_adsb` and appends every line it prints, stamped with its
//! arrival time, to a log file that is replaced after each day of runtime.

use anyhow::{Context, Result};
use tracing::info;

use adsb_pipeline::config::RecorderConfig;
use adsb_pipeline::logging;
use adsb_pipeline::recorder::{RotatingRecorder, SystemClock};
use adsb_pipeline::supervisor::{interrupt_channel, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    info!("===========================================");
    info!("   ADS-B Recorder");
    info!("===========================================");

    let config = RecorderConfig::from_env().context("loading configuration")?;

    info!("Configuration:");
    info!("  Decoder: {}", config.decoder.describe());
    info!("  Log prefix: {}", config.options.prefix);
    info!("  Filter: {:?}", config.options.filter);
    info!("  Rotation: {:?}", config.options.rotation);

    let interrupts = interrupt_channel();
    let mut supervisor = Supervisor::new(config.supervisor.clone());

    let recorder = RotatingRecorder::new(config.options.clone(), SystemClock);
    let decoder = config.decoder.clone();
    supervisor.spawn("recorder", move |ctx| recorder.run(decoder, ctx));

    info!("Press Ctrl+C to stop.");
    let report = supervisor.run(interrupts).await;

    let code = report.exit_code();
    info!("Shutdown complete ({:?}), exit status {}", report.cause, code);
    std::process::exit(code);
}
