//! Mode S demodulation of raw RTL-SDR IQ samples
//!
//! At 2 MSPS a preamble has pulses at samples 0, 2, 7 and 9 and each data
//! bit spans two samples (high-low = 1, low-high = 0). Frames are sliced
//! without any CRC check; validation is left to the frame filter.

use tracing::trace;

use crate::frame::RawFrame;

const PREAMBLE_SAMPLES: usize = 16;
const SHORT_FRAME_BITS: usize = 56;
const LONG_FRAME_BITS: usize = 112;
const SAMPLES_PER_BIT: usize = 2;
const FRAME_SPAN: usize = PREAMBLE_SAMPLES + LONG_FRAME_BITS * SAMPLES_PER_BIT;

/// Default minimum pulse magnitude for a preamble.
pub const DEFAULT_MIN_SIGNAL: u16 = 10;

/// Lookup table from an unsigned (I, Q) byte pair to an approximate
/// magnitude, `max + 0.4 * min` of the centred components.
pub struct MagnitudeTable {
    table: Vec<u16>,
}

impl MagnitudeTable {
    pub fn new() -> Self {
        let mut table = vec![0u16; 256 * 256];

        for i in 0..256u32 {
            for q in 0..256u32 {
                let ai = (i as i32 - 127).unsigned_abs();
                let aq = (q as i32 - 127).unsigned_abs();
                let (hi, lo) = if ai > aq { (ai, aq) } else { (aq, ai) };
                // 102/256 ~ 0.4
                table[(i * 256 + q) as usize] = (((hi << 8) + lo * 102) >> 8) as u16;
            }
        }

        Self { table }
    }

    #[inline(always)]
    pub fn magnitude(&self, i: u8, q: u8) -> u16 {
        self.table[((i as usize) << 8) | (q as usize)]
    }
}

impl Default for MagnitudeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming demodulator. Samples that could still hold the start of a frame
/// are carried over to the next chunk, so frames straddling two reads are
/// not lost.
pub struct Demodulator {
    table: MagnitudeTable,
    min_signal: u16,
    carry: Vec<u16>,
    odd_byte: Option<u8>,
}

impl Demodulator {
    pub fn new(min_signal: u16) -> Self {
        Self {
            table: MagnitudeTable::new(),
            min_signal,
            carry: Vec::new(),
            odd_byte: None,
        }
    }

    /// Feed interleaved IQ bytes and return the frames found, in sample
    /// order.
    pub fn process(&mut self, iq: &[u8]) -> Vec<RawFrame> {
        let mut mag = std::mem::take(&mut self.carry);
        mag.reserve(iq.len() / 2 + 1);

        let mut bytes = iq;
        if let Some(i) = self.odd_byte.take() {
            if let Some((&q, rest)) = bytes.split_first() {
                mag.push(self.table.magnitude(i, q));
                bytes = rest;
            } else {
                self.odd_byte = Some(i);
            }
        }
        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            mag.push(self.table.magnitude(pair[0], pair[1]));
        }
        if let [last] = pairs.remainder() {
            self.odd_byte = Some(*last);
        }

        let mut frames = Vec::new();
        let mut pos = 0;
        while pos + FRAME_SPAN <= mag.len() {
            if !self.is_preamble(&mag, pos) {
                pos += 1;
                continue;
            }

            let data = pos + PREAMBLE_SAMPLES;
            let long = slice_bits(&mag, data, LONG_FRAME_BITS);
            let bits = if long[0] >> 3 >= 16 {
                LONG_FRAME_BITS
            } else {
                SHORT_FRAME_BITS
            };
            let frame = RawFrame::new(hex::encode_upper(&long[..bits / 8]));
            trace!("Preamble at sample {}: {}", pos, frame);
            frames.push(frame);
            pos = data + bits * SAMPLES_PER_BIT;
        }

        self.carry = mag.split_off(pos.min(mag.len()));
        frames
    }

    fn is_preamble(&self, mag: &[u16], pos: usize) -> bool {
        let m = |offset: usize| mag[pos + offset] as i32;

        let pulses = [m(0), m(2), m(7), m(9)];
        let spaces = [m(1), m(3), m(4), m(5), m(6), m(8), m(10)];

        let high = pulses.iter().copied().max().unwrap_or(0);
        let low_pulse = pulses.iter().copied().min().unwrap_or(0);
        let space_max = spaces.iter().copied().max().unwrap_or(0);
        let pulse_sum: i32 = pulses.iter().sum();
        let space_sum: i32 = spaces.iter().sum();

        high >= self.min_signal as i32
            && pulse_sum > space_sum * 2
            && low_pulse * 2 >= high
            && space_max * 3 <= low_pulse * 2
    }
}

impl Default for Demodulator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SIGNAL)
    }
}

/// Manchester-slice `num_bits` bits starting at sample `start`.
fn slice_bits(mag: &[u16], start: usize, num_bits: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; (num_bits + 7) / 8];
    for bit in 0..num_bits {
        let at = start + bit * SAMPLES_PER_BIT;
        if mag[at] > mag[at + 1] {
            bytes[bit / 8] |= 1 << (7 - bit % 8);
        }
    }
    bytes
}
