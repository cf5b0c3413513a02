//! Display stage: one line per decoded message

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::Context;
use chrono::{Local, TimeZone};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::adsb::DecodedMessage;
use crate::error::ConfigError;
use crate::supervisor::WorkerContext;
use crate::transport::ChannelReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for DisplayFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(DisplayFormat::Text),
            "json" => Ok(DisplayFormat::Json),
            _ => Err(ConfigError::Invalid {
                var: "DISPLAY_FORMAT",
                value: s.to_string(),
            }),
        }
    }
}

/// Human-readable summary of a message.
pub fn render_text(msg: &DecodedMessage) -> String {
    let secs = msg.timestamp.floor();
    let nanos = ((msg.timestamp - secs) * 1e9) as u32;
    let time = Local
        .timestamp_opt(secs as i64, nanos)
        .single()
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{:.3}", msg.timestamp));

    let mut line = format!("{} {:06X} DF{:<2}", time, msg.icao_address, msg.df);
    if let Some(tc) = msg.tc {
        let _ = write!(line, " TC{:<2}", tc);
    }
    if let Some(callsign) = &msg.callsign {
        let _ = write!(line, " {:<8}", callsign);
    }
    if let Some(alt) = msg.altitude_ft {
        let _ = write!(line, " {:>6} ft", alt);
    }
    if let Some(speed) = msg.speed_kts {
        let _ = write!(line, " {:>5.1} kt", speed);
    }
    if let Some(heading) = msg.heading_deg {
        let _ = write!(line, " {:>5.1}°", heading);
    }
    if let Some(rate) = msg.vertical_rate_fpm {
        let _ = write!(line, " {:>+6} fpm", rate);
    }
    if let Some(squawk) = msg.squawk {
        let _ = write!(line, " sqk {:04}", squawk);
    }
    let _ = write!(line, "  {}", msg.raw);
    line
}

pub fn render(msg: &DecodedMessage, format: DisplayFormat) -> anyhow::Result<String> {
    Ok(match format {
        DisplayFormat::Text => render_text(msg),
        DisplayFormat::Json => serde_json::to_string(msg)?,
    })
}

/// Writes rendered messages to an output, flushing after each line.
pub struct Display<W> {
    out: W,
    format: DisplayFormat,
    shown: u64,
}

impl<W: AsyncWrite + Unpin> Display<W> {
    pub fn new(out: W, format: DisplayFormat) -> Self {
        Self {
            out,
            format,
            shown: 0,
        }
    }

    pub async fn show(&mut self, msg: &DecodedMessage) -> anyhow::Result<()> {
        let mut line = render(msg, self.format)?;
        line.push('\n');
        self.out
            .write_all(line.as_bytes())
            .await
            .context("writing to display")?;
        self.out.flush().await.context("flushing display")?;
        self.shown += 1;
        Ok(())
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Show messages until the input closes. Keeps draining after a
    /// termination request.
    pub async fn run(
        mut self,
        mut input: ChannelReceiver<DecodedMessage>,
        ctx: WorkerContext,
    ) -> anyhow::Result<()> {
        let mut draining = false;
        loop {
            let msg = tokio::select! {
                biased;
                msg = input.recv() => msg,
                _ = ctx.cancelled(), if !draining => {
                    debug!("Display stage draining");
                    draining = true;
                    continue;
                }
            };
            let Some(msg) = msg else { break };
            self.show(&msg).await?;
        }

        info!("Display stage done: {} messages shown", self.shown);
        Ok(())
    }
}
