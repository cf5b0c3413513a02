//! Stage-to-stage channels and the failure side-channel

use std::fmt;

use chrono::{DateTime, Utc};
use crossbeam_channel::TrySendError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Default capacity of the failure side-channel. Only the first report is
/// needed to trigger shutdown.
pub const FAILURE_CHANNEL_CAPACITY: usize = 16;

/// Create a bounded, ordered, one-directional channel between two stages.
pub fn channel<T>(capacity: usize) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelSender { tx }, ChannelReceiver { rx })
}

#[derive(Debug)]
pub struct ChannelSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> ChannelSender<T> {
    /// Send one payload, waiting for room. Gives up when `cancel` fires so a
    /// stalled consumer cannot pin the sender past shutdown.
    pub async fn send(&self, item: T, cancel: &CancellationToken) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            result = self.tx.send(item) => result.map_err(|_| TransportError::Closed),
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
        }
    }

    /// Send without waiting. Hands the item back when the channel is full or
    /// closed.
    pub fn try_send(&self, item: T) -> Result<(), T> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(item) | mpsc::error::TrySendError::Closed(item) => item,
        })
    }
}

#[derive(Debug)]
pub struct ChannelReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> ChannelReceiver<T> {
    /// Next payload, or `None` once every sender is gone and the buffer is
    /// empty.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

/// Terminal error captured in a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    pub worker: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl FailureReport {
    pub fn new(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Report carrying the full context chain of an error.
    pub fn from_error(worker: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::new(worker, format!("{:#}", error))
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] worker '{}' failed: {}",
            self.at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.worker,
            self.message
        )
    }
}

/// Create the failure side-channel.
pub fn failure_channel(capacity: usize) -> (FailureSender, FailureReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        FailureSender {
            tx,
            overflow: rx.clone(),
        },
        FailureReceiver { rx },
    )
}

/// Reporting end. Never blocks: when the queue is full the oldest report is
/// discarded to make room.
#[derive(Debug, Clone)]
pub struct FailureSender {
    tx: crossbeam_channel::Sender<FailureReport>,
    overflow: crossbeam_channel::Receiver<FailureReport>,
}

impl FailureSender {
    pub fn report(&self, report: FailureReport) {
        let mut report = report;
        loop {
            match self.tx.try_send(report) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.overflow.try_recv();
                    report = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

#[derive(Debug)]
pub struct FailureReceiver {
    rx: crossbeam_channel::Receiver<FailureReport>,
}

impl FailureReceiver {
    pub fn has_pending(&self) -> bool {
        !self.rx.is_empty()
    }

    pub fn drain(&self) -> Vec<FailureReport> {
        self.rx.try_iter().collect()
    }
}
