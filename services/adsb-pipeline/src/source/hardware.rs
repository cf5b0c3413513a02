//! RTL-SDR capture through the `rtl_sdr` tool

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tracing::{debug, info};

use super::demod::{Demodulator, DEFAULT_MIN_SIGNAL};
use super::process::{spawn_piped, terminate_child};
use super::Acquired;
use crate::error::SourceError;
use crate::frame::FrameRecord;

/// Mode S downlink frequency.
pub const FREQUENCY_HZ: u32 = 1_090_000_000;
/// 2 MSPS gives two samples per 1 us Mode S bit.
pub const SAMPLE_RATE: u32 = 2_000_000;

const READ_CHUNK_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct HardwareSource {
    pub rtl_sdr_path: PathBuf,
    pub device_index: u32,
    pub gain_db: f32,
    pub ppm_error: i32,
    pub min_signal: u16,
}

impl Default for HardwareSource {
    fn default() -> Self {
        Self {
            rtl_sdr_path: PathBuf::from("rtl_sdr"),
            device_index: 0,
            gain_db: 49.6,
            ppm_error: 0,
            min_signal: DEFAULT_MIN_SIGNAL,
        }
    }
}

impl HardwareSource {
    pub fn describe(&self) -> String {
        format!("RTL-SDR device {}", self.device_index)
    }

    /// Arguments for `rtl_sdr`, writing raw IQ to stdout.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-d".to_string(),
            self.device_index.to_string(),
            "-f".to_string(),
            FREQUENCY_HZ.to_string(),
            "-s".to_string(),
            SAMPLE_RATE.to_string(),
            "-g".to_string(),
            self.gain_db.to_string(),
        ];
        if self.ppm_error != 0 {
            args.push("-p".to_string());
            args.push(self.ppm_error.to_string());
        }
        args.push("-".to_string());
        args
    }

    pub(crate) fn open(&self) -> Result<HardwareReader, SourceError> {
        info!(
            "Starting RTL-SDR capture: device={}, freq={} Hz, rate={} S/s, gain={} dB",
            self.device_index, FREQUENCY_HZ, SAMPLE_RATE, self.gain_db
        );
        let (child, stdout) = spawn_piped(&self.rtl_sdr_path, &self.args())?;

        Ok(HardwareReader {
            child,
            stdout,
            demod: Demodulator::new(self.min_signal),
            chunk: vec![0u8; READ_CHUNK_BYTES],
            pending: VecDeque::new(),
            origin: self.describe(),
        })
    }
}

pub(crate) struct HardwareReader {
    child: Child,
    stdout: ChildStdout,
    demod: Demodulator,
    chunk: Vec<u8>,
    pending: VecDeque<FrameRecord>,
    origin: String,
}

impl HardwareReader {
    /// Frames from one read share its arrival time. The dongle going away is
    /// a failure.
    pub(crate) async fn next(&mut self) -> Result<Option<Acquired>, SourceError> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(Acquired::Frame(record)));
            }

            let n = self
                .stdout
                .read(&mut self.chunk)
                .await
                .map_err(|source| SourceError::Read {
                    origin: self.origin.clone(),
                    source,
                })?;
            if n == 0 {
                return Err(SourceError::Closed {
                    origin: self.origin.clone(),
                    detail: "rtl_sdr stopped producing samples".to_string(),
                });
            }

            self.pending.extend(
                self.demod
                    .process(&self.chunk[..n])
                    .into_iter()
                    .map(FrameRecord::now),
            );
        }
    }

    pub(crate) async fn close(mut self, timeout: Duration) {
        match terminate_child(&mut self.child, timeout).await {
            Ok(status) => debug!("rtl_sdr exited: {}", status),
            Err(e) => debug!("Failed to stop rtl_sdr: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtl_sdr_args() {
        let source = HardwareSource {
            device_index: 1,
            gain_db: 40.2,
            ppm_error: -3,
            ..Default::default()
        };
        assert_eq!(
            source.args(),
            vec!["-d", "1", "-f", "1090000000", "-s", "2000000", "-g", "40.2", "-p", "-3", "-"]
        );
    }

    #[test]
    fn test_zero_ppm_is_omitted() {
        let args = HardwareSource::default().args();
        assert!(!args.contains(&"-p".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }
}
