//! Per-category batching of accepted frames

use crate::filter::FrameClass;
use crate::frame::FrameRecord;

/// Flush once the ADS-B buffer holds more than this many frames.
pub const DEFAULT_ADSB_FLUSH_THRESHOLD: usize = 1;

/// Accepted frames grouped by category, in arrival order. Consumed once by
/// the receiving stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameBatch {
    pub adsb: Vec<FrameRecord>,
    pub commb: Vec<FrameRecord>,
}

impl FrameBatch {
    pub fn len(&self) -> usize {
        self.adsb.len() + self.commb.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adsb.is_empty() && self.commb.is_empty()
    }
}

/// Accumulates accepted frames and hands out a batch when the ADS-B side
/// crosses the threshold.
///
/// There is no time-based trigger here: a trickle of single ADS-B frames or
/// Comm-B-only traffic stays buffered until [`FrameBatcher::take_partial`]
/// is called by the owner.
#[derive(Debug)]
pub struct FrameBatcher {
    pending: FrameBatch,
    adsb_threshold: usize,
}

impl FrameBatcher {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_ADSB_FLUSH_THRESHOLD)
    }

    pub fn with_threshold(adsb_threshold: usize) -> Self {
        Self {
            pending: FrameBatch::default(),
            adsb_threshold,
        }
    }

    /// Buffer one classified record. Rejected records are ignored.
    pub fn push(&mut self, class: FrameClass, record: FrameRecord) -> Option<FrameBatch> {
        match class {
            FrameClass::LongSquitter => self.pending.adsb.push(record),
            FrameClass::CommB => self.pending.commb.push(record),
            FrameClass::Rejected(_) => return None,
        }

        if self.pending.adsb.len() > self.adsb_threshold {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// Take whatever is buffered, if anything.
    pub fn take_partial(&mut self) -> Option<FrameBatch> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn pending(&self) -> &FrameBatch {
        &self.pending
    }
}

impl Default for FrameBatcher {
    fn default() -> Self {
        Self::new()
    }
}
