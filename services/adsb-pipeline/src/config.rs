//! Configuration loaded from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::DisplayFormat;
use crate::recorder::{RecordFilter, RecorderOptions};
use crate::source::{
    AcquisitionOptions, ExternalProcessSource, FileSource, FrameSource, HardwareSource,
    NetDatatype, NetworkSource,
};
use crate::supervisor::SupervisorConfig;

/// Largest accepted `CHANNEL_CAPACITY`. The message channel holds
/// [`MESSAGES_PER_BATCH`] times as many items.
pub const MAX_CHANNEL_CAPACITY: usize = 1 << 16;

/// Decoded messages buffered per frame batch slot.
pub const MESSAGES_PER_BATCH: usize = 16;

/// Variable lookup, `std::env::var` outside of tests.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(env: Lookup, var: &'static str, default: T) -> Result<T, ConfigError> {
    match env(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

fn millis(env: Lookup, var: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    parsed(env, var, default_ms).map(Duration::from_millis)
}

/// Like [`millis`], but zero is rejected.
fn period(env: Lookup, var: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let value = millis(env, var, default_ms)?;
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn words(env: Lookup, var: &str) -> Vec<String> {
    env(var)
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn flag(env: Lookup, var: &'static str) -> Result<bool, ConfigError> {
    match env(var) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { var, value }),
        },
    }
}

fn external_decoder(env: Lookup) -> ExternalProcessSource {
    ExternalProcessSource::new(
        env("RTL_ADSB_PATH").unwrap_or_else(|| "rtl_adsb".to_string()),
        words(env, "RTL_ADSB_ARGS"),
    )
}

fn supervisor(env: Lookup) -> Result<SupervisorConfig, ConfigError> {
    let defaults = SupervisorConfig::default();
    Ok(SupervisorConfig {
        poll_interval: period(env, "POLL_INTERVAL_MS", defaults.poll_interval.as_millis() as u64)?,
        termination_timeout: millis(
            env,
            "TERMINATION_TIMEOUT_MS",
            defaults.termination_timeout.as_millis() as u64,
        )?,
        kill_timeout: millis(env, "KILL_TIMEOUT_MS", defaults.kill_timeout.as_millis() as u64)?,
    })
}

/// Settings for the live decode-and-display pipeline
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub source: FrameSource,
    pub acquisition: AcquisitionOptions,
    pub display_format: DisplayFormat,
    pub channel_capacity: usize,
    pub supervisor: SupervisorConfig,
}

impl LiveConfig {
    /// Load from the environment. `source_arg` (the first command line
    /// argument) takes precedence over `ADSB_SOURCE`.
    pub fn from_env(source_arg: Option<String>) -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup, source_arg)
    }

    pub fn from_lookup(env: Lookup, source_arg: Option<String>) -> Result<Self, ConfigError> {
        let selector = source_arg
            .or_else(|| env("ADSB_SOURCE"))
            .unwrap_or_else(|| "rtlsdr".to_string());

        let source = match selector.as_str() {
            "rtlsdr" => {
                let defaults = HardwareSource::default();
                FrameSource::Hardware(HardwareSource {
                    rtl_sdr_path: env("RTL_SDR_PATH")
                        .map(PathBuf::from)
                        .unwrap_or(defaults.rtl_sdr_path),
                    device_index: parsed(env, "DEVICE_INDEX", defaults.device_index)?,
                    gain_db: parsed(env, "DEVICE_GAIN", defaults.gain_db)?,
                    ppm_error: parsed(env, "PPM_ERROR", defaults.ppm_error)?,
                    min_signal: parsed(env, "MIN_SIGNAL", defaults.min_signal)?,
                })
            }
            "rtladsb" => FrameSource::ExternalProcess(external_decoder(env)),
            "net" => FrameSource::Network(NetworkSource::new(
                env("NET_HOST").unwrap_or_else(|| "localhost".to_string()),
                parsed(env, "NET_PORT", 30002u16)?,
                env("NET_DATATYPE")
                    .map(|d| d.parse::<NetDatatype>())
                    .transpose()?
                    .unwrap_or(NetDatatype::Raw),
            )),
            path if std::path::Path::new(path).is_file() => FrameSource::File(FileSource::new(path)),
            other => return Err(ConfigError::UnknownSource(other.to_string())),
        };

        let flush_interval = match env("BATCH_FLUSH_INTERVAL_MS") {
            Some(_) => Some(period(env, "BATCH_FLUSH_INTERVAL_MS", 0)?),
            None => None,
        };

        let channel_capacity = parsed(env, "CHANNEL_CAPACITY", 64usize)?;
        if channel_capacity == 0 || channel_capacity > MAX_CHANNEL_CAPACITY {
            return Err(ConfigError::Invalid {
                var: "CHANNEL_CAPACITY",
                value: channel_capacity.to_string(),
            });
        }

        Ok(Self {
            source,
            acquisition: AcquisitionOptions {
                flush_interval,
                ..Default::default()
            },
            display_format: parsed(env, "DISPLAY_FORMAT", DisplayFormat::Text)?,
            channel_capacity,
            supervisor: supervisor(env)?,
        })
    }

    /// Capacity of the channel between the decode and display stages.
    pub fn message_capacity(&self) -> usize {
        self.channel_capacity.saturating_mul(MESSAGES_PER_BATCH)
    }
}

/// Settings for the rotating recorder
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub decoder: ExternalProcessSource,
    pub options: RecorderOptions,
    pub supervisor: SupervisorConfig,
}

impl RecorderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(env: Lookup) -> Result<Self, ConfigError> {
        let defaults = RecorderOptions::default();

        let mut filter = parsed(env, "RECORD_FILTER", defaults.filter)?;
        if flag(env, "ONLY_VALID_ADSB")? {
            filter = RecordFilter::AdsbOnly;
        }

        let rotation = parsed(env, "ROTATION_SECS", defaults.rotation.as_secs())?;
        if rotation == 0 {
            return Err(ConfigError::Invalid {
                var: "ROTATION_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            decoder: external_decoder(env),
            options: RecorderOptions {
                prefix: env("LOGFILE_PREFIX").unwrap_or(defaults.prefix),
                comment: env("RECORDER_COMMENT"),
                filter,
                rotation: Duration::from_secs(rotation),
                restart_delay: millis(
                    env,
                    "RESTART_DELAY_MS",
                    defaults.restart_delay.as_millis() as u64,
                )?,
                echo: defaults.echo,
            },
            supervisor: supervisor(env)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_live_defaults_to_hardware() {
        let config = LiveConfig::from_lookup(&vars(&[]), None).unwrap();
        assert_eq!(config.source, FrameSource::Hardware(HardwareSource::default()));
        assert_eq!(config.display_format, DisplayFormat::Text);
        assert_eq!(config.channel_capacity, 64);
        assert!(config.acquisition.flush_interval.is_none());
        assert_eq!(config.supervisor.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_network_source() {
        let env = vars(&[
            ("ADSB_SOURCE", "net"),
            ("NET_HOST", "10.0.0.5"),
            ("NET_PORT", "30005"),
            ("NET_DATATYPE", "beast"),
        ]);
        let config = LiveConfig::from_lookup(&env, None).unwrap();
        assert_eq!(
            config.source,
            FrameSource::Network(NetworkSource::new("10.0.0.5", 30005, NetDatatype::Beast))
        );
    }

    #[test]
    fn test_argument_overrides_env() {
        let env = vars(&[("ADSB_SOURCE", "net"), ("RTL_ADSB_ARGS", "-g 40 -p 2")]);
        let config = LiveConfig::from_lookup(&env, Some("rtladsb".to_string())).unwrap();
        assert_eq!(
            config.source,
            FrameSource::ExternalProcess(ExternalProcessSource::new(
                "rtl_adsb",
                vec!["-g".into(), "40".into(), "-p".into(), "2".into()]
            ))
        );
    }

    #[test]
    fn test_file_source_and_flush_timer() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        let env = vars(&[("BATCH_FLUSH_INTERVAL_MS", "250")]);

        let config = LiveConfig::from_lookup(&env, Some(path.clone())).unwrap();
        assert_eq!(config.source, FrameSource::File(FileSource::new(path)));
        assert_eq!(config.acquisition.flush_interval, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = LiveConfig::from_lookup(&vars(&[("NET_PORT", "http")]), Some("net".into()))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "NET_PORT",
                value: "http".to_string()
            }
        );

        let err = LiveConfig::from_lookup(&vars(&[("NET_DATATYPE", "skysense")]), Some("net".into()))
            .unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedDatatype("skysense".to_string()));

        let err = LiveConfig::from_lookup(&vars(&[]), Some("/nonexistent/recording".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSource(_)));
    }

    #[test]
    fn test_rejects_zero_periods() {
        let err = LiveConfig::from_lookup(&vars(&[("POLL_INTERVAL_MS", "0")]), None).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "POLL_INTERVAL_MS",
                value: "0".to_string()
            }
        );

        let err = LiveConfig::from_lookup(&vars(&[("BATCH_FLUSH_INTERVAL_MS", "0")]), None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "BATCH_FLUSH_INTERVAL_MS", .. }));

        let err = RecorderConfig::from_lookup(&vars(&[("POLL_INTERVAL_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "POLL_INTERVAL_MS", .. }));
    }

    #[test]
    fn test_channel_capacity_bounds() {
        let config = LiveConfig::from_lookup(&vars(&[("CHANNEL_CAPACITY", "65536")]), None).unwrap();
        assert_eq!(config.message_capacity(), 65536 * 16);

        for value in ["0", "65537", "18446744073709551615"] {
            let err = LiveConfig::from_lookup(&vars(&[("CHANNEL_CAPACITY", value)]), None).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { var: "CHANNEL_CAPACITY", .. }));
        }
    }

    #[test]
    fn test_recorder_config() {
        let env = vars(&[
            ("LOGFILE_PREFIX", "/var/log/adsb/day_"),
            ("RECORDER_COMMENT", "roof antenna"),
            ("ONLY_VALID_ADSB", "true"),
            ("ROTATION_SECS", "3600"),
        ]);
        let config = RecorderConfig::from_lookup(&env).unwrap();
        assert_eq!(config.options.prefix, "/var/log/adsb/day_");
        assert_eq!(config.options.comment.as_deref(), Some("roof antenna"));
        assert_eq!(config.options.filter, RecordFilter::AdsbOnly);
        assert_eq!(config.options.rotation, Duration::from_secs(3600));
        assert_eq!(config.options.restart_delay, Duration::from_secs(2));
        assert_eq!(config.decoder.program(), std::path::Path::new("rtl_adsb"));
    }

    #[test]
    fn test_recorder_filter_default() {
        let config = RecorderConfig::from_lookup(&vars(&[])).unwrap();
        assert_eq!(config.options.filter, RecordFilter::All);
        assert_eq!(config.options.rotation, Duration::from_secs(86400));
    }
}
