//! Log setup shared by the binaries

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "adsb_pipeline=info";

/// Install the global subscriber. Logs go to stderr; stdout carries frame
/// and message output only. `RUST_LOG` overrides the default filter.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
