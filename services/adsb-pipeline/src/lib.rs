//! ADS-B frame acquisition and supervised processing pipelines
//!
//! Frames are read from a file, a network feed, an RTL-SDR dongle or an
//! external decoder such as `rtl_adsb`, filtered, batched and handed to
//! either the live decode-and-display stages or the rotating recorder. All
//! stages run as workers under a [`supervisor::Supervisor`].

pub mod adsb;
pub mod batcher;
pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod logging;
pub mod pipeline;
pub mod recorder;
pub mod source;
pub mod supervisor;
pub mod transport;

pub use batcher::{FrameBatch, FrameBatcher};
pub use error::{ConfigError, FrameError, RecordError, SourceError, TransportError};
pub use filter::{classify, FrameClass, RejectReason};
pub use frame::{FrameRecord, RawFrame, Timestamp};
pub use source::FrameSource;
pub use supervisor::{ShutdownCause, Supervisor, SupervisorConfig, SupervisorReport};
pub use transport::{channel, failure_channel, FailureReport};
