//! TSZ Compression Primitives
//!
//! This module implements the Gorilla-style building blocks shared by the
//! datapoint codec and the per-field custom encodings:
//!
//! ## Float XOR ([`XorState`])
//!
//! The first value is stored as 64 raw bits. Each subsequent value is XORed
//! with the previous bits and the result is framed with control bits:
//!
//! - `0` - the XOR is zero (value repeated)
//! - `1,0` - the XOR fits the previous meaningful window
//!   `[prev_trailing, 64 - prev_leading)`; only those bits follow
//! - `1,1` - fresh window: 6 bits of leading-zero count, 6 bits of
//!   `meaningful_bits - 1`, then the meaningful bits
//!
//! ## Integer significant bits ([`IntSigTracker`])
//!
//! Integer fields are stored as sign + magnitude diffs against the previous
//! value. The tracker holds the current magnitude width; a one-bit
//! "changed?" flag precedes any width update (one-bit "zero-sig?" flag,
//! else 6 bits of `num_sig - 1`).
//!
//! ## Timestamps ([`TimestampEncoder`] / [`TimestampIterator`])
//!
//! Delta-of-delta with the classic Gorilla tiers: `0` for dod zero, then
//! `10`/`110`/`1110` prefixes for 7/9/12-bit windows and `1111` for a raw
//! 64-bit escape. The first timestamp is written as 64 raw bits. Both types
//! operate on a caller-supplied stream so an enclosing iterator can share a
//! single stream with the nested timestamp reader.
//!
//! ## Datapoint codec ([`TszEncoder`] / [`TszIterator`])
//!
//! A standalone streaming codec for `DataPoint` sequences. Each point is
//! prefixed with a more-data bit; `finish` terminates the stream with a
//! zero bit so the reader does not depend on trailing padding.

use bytes::Bytes;
use tidestore_core::{DataPoint, IStream, OStream, Result};

/// Number of bits used to encode a leading-zero count or `num_sig - 1`.
const NUM_SIG_BITS: usize = 6;

fn leading_and_trailing_zeros(v: u64) -> (usize, usize) {
    if v == 0 {
        return (64, 0);
    }
    (v.leading_zeros() as usize, v.trailing_zeros() as usize)
}

/// Number of significant (non-leading-zero) bits in `v`; 0 for zero.
pub fn num_sig(v: u64) -> u8 {
    (64 - v.leading_zeros()) as u8
}

fn sign_extend(v: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}

// ---------------------------------------------------------------------
// Float XOR
// ---------------------------------------------------------------------

/// Per-stream (or per-field) float XOR predictor state.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorState {
    pub prev_bits: u64,
    pub prev_xor: u64,
}

impl XorState {
    /// Write the first value of a stream as 64 raw bits.
    pub fn write_first(&mut self, stream: &mut OStream, bits: u64) {
        stream.write_bits(bits, 64);
        self.prev_bits = bits;
        self.prev_xor = bits;
    }

    /// Write a subsequent value as an XOR block.
    pub fn write_next(&mut self, stream: &mut OStream, cur_bits: u64) {
        let xor = self.prev_bits ^ cur_bits;
        self.write_xor(stream, xor);
        self.prev_xor = xor;
        self.prev_bits = cur_bits;
    }

    fn write_xor(&mut self, stream: &mut OStream, xor: u64) {
        if xor == 0 {
            stream.write_bit(0);
            return;
        }

        let (prev_leading, prev_trailing) = leading_and_trailing_zeros(self.prev_xor);
        let (leading, trailing) = leading_and_trailing_zeros(xor);

        stream.write_bit(1);
        if leading >= prev_leading && trailing >= prev_trailing {
            // Contained in the previous meaningful window.
            stream.write_bit(0);
            stream.write_bits(xor >> prev_trailing, 64 - prev_leading - prev_trailing);
            return;
        }

        let meaningful = 64 - leading - trailing;
        stream.write_bit(1);
        stream.write_bits(leading as u64, NUM_SIG_BITS);
        stream.write_bits((meaningful - 1) as u64, NUM_SIG_BITS);
        stream.write_bits(xor >> trailing, meaningful);
    }

    /// Read the first value of a stream.
    pub fn read_first(&mut self, stream: &mut IStream) -> Result<u64> {
        let bits = stream.read_bits(64)?;
        self.prev_bits = bits;
        self.prev_xor = bits;
        Ok(bits)
    }

    /// Read a subsequent XOR block and return the reconstructed bits.
    pub fn read_next(&mut self, stream: &mut IStream) -> Result<u64> {
        let xor = self.read_xor(stream)?;
        let bits = self.prev_bits ^ xor;
        self.prev_xor = xor;
        self.prev_bits = bits;
        Ok(bits)
    }

    fn read_xor(&mut self, stream: &mut IStream) -> Result<u64> {
        if stream.read_bit()? == 0 {
            return Ok(0);
        }

        if stream.read_bit()? == 0 {
            let (prev_leading, prev_trailing) = leading_and_trailing_zeros(self.prev_xor);
            let meaningful = 64 - prev_leading - prev_trailing;
            let bits = stream.read_bits(meaningful)?;
            return Ok(bits << prev_trailing);
        }

        let leading = stream.read_bits(NUM_SIG_BITS)? as usize;
        let meaningful = stream.read_bits(NUM_SIG_BITS)? as usize + 1;
        let trailing = 64 - leading - meaningful;
        let bits = stream.read_bits(meaningful)?;
        Ok(bits << trailing)
    }
}

// ---------------------------------------------------------------------
// Integer significant bits
// ---------------------------------------------------------------------

/// Tracks the current significant-bit width for an integer field.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntSigTracker {
    pub num_sig: u8,
}

impl IntSigTracker {
    /// Write a width update: a "changed?" bit, then on change either the
    /// zero-sig flag or 6 bits of `sig - 1`.
    pub fn write_sig(&mut self, stream: &mut OStream, sig: u8) {
        if self.num_sig == sig {
            stream.write_bit(0);
        } else {
            stream.write_bit(1);
            if sig == 0 {
                stream.write_bit(0);
            } else {
                stream.write_bit(1);
                stream.write_bits((sig - 1) as u64, NUM_SIG_BITS);
            }
        }
        self.num_sig = sig;
    }

    /// Read a width update written by [`write_sig`](Self::write_sig).
    pub fn read_sig(&mut self, stream: &mut IStream) -> Result<()> {
        if stream.read_bit()? == 0 {
            return Ok(());
        }
        if stream.read_bit()? == 0 {
            self.num_sig = 0;
        } else {
            self.num_sig = stream.read_bits(NUM_SIG_BITS)? as u8 + 1;
        }
        Ok(())
    }

    /// Write a diff as one sign bit plus `num_sig` magnitude bits. The
    /// caller must have written the matching width with `write_sig` first.
    pub fn write_diff(&self, stream: &mut OStream, magnitude: u64, negative: bool) {
        stream.write_bit(negative as u8);
        stream.write_bits(magnitude, self.num_sig as usize);
    }

    /// Read a diff written by [`write_diff`](Self::write_diff).
    pub fn read_diff(&self, stream: &mut IStream) -> Result<(u64, bool)> {
        let negative = stream.read_bit()? == 1;
        let magnitude = stream.read_bits(self.num_sig as usize)?;
        Ok((magnitude, negative))
    }
}

// ---------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------

/// Delta-of-delta timestamp writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampEncoder {
    prev_time: i64,
    prev_delta: i64,
}

impl TimestampEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the first timestamp as 64 raw bits.
    pub fn write_first(&mut self, stream: &mut OStream, t: i64) {
        stream.write_bits(t as u64, 64);
        self.prev_time = t;
        self.prev_delta = 0;
    }

    /// Write a subsequent timestamp as a delta-of-delta block.
    pub fn write_next(&mut self, stream: &mut OStream, t: i64) {
        let delta = t.wrapping_sub(self.prev_time);
        let dod = delta.wrapping_sub(self.prev_delta);

        if dod == 0 {
            stream.write_bit(0);
        } else if (-64..64).contains(&dod) {
            stream.write_bit(1);
            stream.write_bit(0);
            stream.write_bits(dod as u64, 7);
        } else if (-256..256).contains(&dod) {
            stream.write_bit(1);
            stream.write_bit(1);
            stream.write_bit(0);
            stream.write_bits(dod as u64, 9);
        } else if (-2048..2048).contains(&dod) {
            stream.write_bit(1);
            stream.write_bit(1);
            stream.write_bit(1);
            stream.write_bit(0);
            stream.write_bits(dod as u64, 12);
        } else {
            stream.write_bit(1);
            stream.write_bit(1);
            stream.write_bit(1);
            stream.write_bit(1);
            stream.write_bits(dod as u64, 64);
        }

        self.prev_delta = delta;
        self.prev_time = t;
    }
}

/// Delta-of-delta timestamp reader. Advances a stream owned by the caller
/// so it can be nested inside a larger iterator over the same stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampIterator {
    prev_time: i64,
    prev_delta: i64,
}

impl TimestampIterator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_first(&mut self, stream: &mut IStream) -> Result<i64> {
        let t = stream.read_bits(64)? as i64;
        self.prev_time = t;
        self.prev_delta = 0;
        Ok(t)
    }

    pub fn read_next(&mut self, stream: &mut IStream) -> Result<i64> {
        let dod = if stream.read_bit()? == 0 {
            0
        } else if stream.read_bit()? == 0 {
            sign_extend(stream.read_bits(7)?, 7)
        } else if stream.read_bit()? == 0 {
            sign_extend(stream.read_bits(9)?, 9)
        } else if stream.read_bit()? == 0 {
            sign_extend(stream.read_bits(12)?, 12)
        } else {
            stream.read_bits(64)? as i64
        };

        let delta = self.prev_delta.wrapping_add(dod);
        let t = self.prev_time.wrapping_add(delta);
        self.prev_delta = delta;
        self.prev_time = t;
        Ok(t)
    }
}

// ---------------------------------------------------------------------
// Datapoint codec
// ---------------------------------------------------------------------

/// Streaming encoder for a sequence of datapoints.
#[derive(Debug, Default)]
pub struct TszEncoder {
    stream: OStream,
    timestamps: TimestampEncoder,
    values: XorState,
    count: usize,
}

impl TszEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, dp: DataPoint) {
        self.stream.write_bit(1);
        if self.count == 0 {
            self.timestamps.write_first(&mut self.stream, dp.timestamp);
            self.values.write_first(&mut self.stream, dp.value.to_bits());
        } else {
            self.timestamps.write_next(&mut self.stream, dp.timestamp);
            self.values.write_next(&mut self.stream, dp.value.to_bits());
        }
        self.count += 1;
    }

    /// Number of datapoints encoded so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of whole bytes in the underlying stream.
    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Terminate the stream and return the encoded bytes.
    pub fn finish(mut self) -> Bytes {
        self.stream.write_bit(0);
        self.stream.into_bytes()
    }
}

/// Streaming decoder for a sequence of datapoints.
#[derive(Debug)]
pub struct TszIterator {
    stream: IStream,
    timestamps: TimestampIterator,
    values: XorState,
    consumed_first: bool,
    done: bool,
}

impl TszIterator {
    pub fn new(data: Bytes) -> Self {
        Self {
            stream: IStream::new(data),
            timestamps: TimestampIterator::new(),
            values: XorState::default(),
            consumed_first: false,
            done: false,
        }
    }

    /// Decode the next datapoint, or `None` once the stream terminates.
    pub fn try_next(&mut self) -> Result<Option<DataPoint>> {
        if self.done {
            return Ok(None);
        }

        match self.stream.read_bit() {
            Ok(1) => {}
            Ok(_) => {
                self.done = true;
                return Ok(None);
            }
            Err(tidestore_core::Error::EndOfStream) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let (t, bits) = if !self.consumed_first {
            let t = self.timestamps.read_first(&mut self.stream)?;
            let bits = self.values.read_first(&mut self.stream)?;
            self.consumed_first = true;
            (t, bits)
        } else {
            let t = self.timestamps.read_next(&mut self.stream)?;
            let bits = self.values.read_next(&mut self.stream)?;
            (t, bits)
        };

        Ok(Some(DataPoint::new(t, f64::from_bits(bits))))
    }
}
