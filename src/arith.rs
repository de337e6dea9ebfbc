//! Revised low-precision arithmetic coding.
//!
//! A renormalizing range coder over a B-bit code range and an F-bit
//! frequency range, after Moffat, Neal and Witten's "Arithmetic Coding
//! Revisited". The division `R / total` is performed before the
//! multiplication, which admits large frequency totals at a small
//! compression cost; the symbol at the end of the frequency range absorbs
//! the excess code range above `r * total`.
//!
//! Carry propagation is deferred through a bits-outstanding counter rather
//! than a two-state underflow loop; the wire format depends on this.

use std::io::{Read, Write};

use crate::bitio::{BitReader, BitWriter};
use crate::config::CodecConfig;
use crate::error::{Error, Result};

pub(crate) type CodeValue = u64;
pub(crate) type FreqValue = u64;

/// Bound on the follow-bit counter. Exceeding it requires a compressed
/// stream containing this many identical bits in a row.
const MAX_BITS_OUTSTANDING: u64 = 1 << 31;

/// Encoding half of the range coder, owning the bit sink.
pub(crate) struct Encoder<W: Write> {
    out: BitWriter<W>,
    low: CodeValue,
    range: CodeValue,
    bits_outstanding: u64,
    b_bits: u32,
    half: CodeValue,
    quarter: CodeValue,
    frugal: bool,
    ignore_first_bit: bool,
}

impl<W: Write> Encoder<W> {
    /// Starts an encoder with the coding range `[0, Half)`.
    pub(crate) fn new(inner: W, cfg: &CodecConfig) -> Self {
        let half = 1u64 << (cfg.code_bits - 1);
        Self {
            out: BitWriter::new(inner),
            low: 0,
            range: half,
            bits_outstanding: 0,
            b_bits: cfg.code_bits,
            half,
            quarter: half >> 1,
            frugal: cfg.frugal_bits,
            // With an initial range of [0, Half) the first output bit is
            // always zero; frugal mode does not transmit it.
            ignore_first_bit: cfg.frugal_bits,
        }
    }

    /// Resets the coding range for a further sequence in the same bitstream.
    #[allow(dead_code)]
    pub(crate) fn restart(&mut self) {
        self.low = 0;
        self.range = self.half;
        self.bits_outstanding = 0;
        self.ignore_first_bit = self.frugal;
    }

    fn bit_plus_follow(&mut self, bit: u32) -> Result<()> {
        if self.ignore_first_bit {
            self.ignore_first_bit = false;
            return Ok(());
        }
        self.out.write_bit(bit)?;
        while self.bits_outstanding > 0 {
            self.out.write_bit(1 - bit)?;
            self.bits_outstanding -= 1;
        }
        Ok(())
    }

    fn renormalize(&mut self) -> Result<()> {
        while self.range <= self.quarter {
            if self.low >= self.half {
                self.bit_plus_follow(1)?;
                self.low -= self.half;
            } else if self.low + self.range <= self.half {
                self.bit_plus_follow(0)?;
            } else {
                self.bits_outstanding += 1;
                self.low -= self.quarter;
            }
            self.low <<= 1;
            self.range <<= 1;
        }
        Ok(())
    }

    /// Encodes a symbol occupying `[low, high)` out of `total`.
    pub(crate) fn encode(&mut self, low: FreqValue, high: FreqValue, total: FreqValue) -> Result<()> {
        debug_assert!(low < high && high <= total);
        let r = self.range / total;
        let temp = r * low;
        self.low += temp;
        if high < total {
            self.range = r * (high - low);
        } else {
            // Symbol at the end of the range: give it the excess code range.
            self.range -= temp;
        }
        self.renormalize()?;
        if self.bits_outstanding > MAX_BITS_OUTSTANDING {
            return Err(Error::OutputSaturated);
        }
        Ok(())
    }

    /// Encodes one bit against the counts `(c0, c1)`. The least probable
    /// symbol takes the exact product range; the most probable symbol keeps
    /// the remainder, excess code range included.
    pub(crate) fn encode_binary(&mut self, c0: FreqValue, c1: FreqValue, bit: u32) -> Result<()> {
        let (lps, c_lps) = if c0 < c1 { (0, c0) } else { (1, c1) };
        let r_lps = (self.range / (c0 + c1)) * c_lps;
        if bit == lps {
            self.low += self.range - r_lps;
            self.range = r_lps;
        } else {
            self.range -= r_lps;
        }
        self.renormalize()?;
        if self.bits_outstanding > MAX_BITS_OUTSTANDING {
            return Err(Error::OutputSaturated);
        }
        Ok(())
    }

    /// Finishes the coding sequence, making the last symbol unambiguous.
    ///
    /// In frugal mode the shortest prefix of L (1..=B bits) whose rounded
    /// interval falls within `[L, L+R)` is emitted; otherwise all B bits
    /// of L are.
    pub(crate) fn finish(&mut self) -> Result<()> {
        let (nbits, bits) = if self.frugal {
            let mut chosen = (self.b_bits, self.low);
            for nbits in 1..=self.b_bits {
                let roundup = (1u64 << (self.b_bits - nbits)) - 1;
                let bits = (self.low + roundup) >> (self.b_bits - nbits);
                let value = bits << (self.b_bits - nbits);
                if self.low <= value && value + roundup <= self.low + (self.range - 1) {
                    chosen = (nbits, bits);
                    break;
                }
            }
            chosen
        } else {
            (self.b_bits, self.low)
        };
        for i in 1..=nbits {
            self.bit_plus_follow(((bits >> (nbits - i)) & 1) as u32)?;
        }
        Ok(())
    }

    /// Pads and flushes the underlying bit sink.
    pub(crate) fn flush(&mut self) -> Result<()> {
        self.out.flush()
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.out.bytes_written()
    }

    pub(crate) fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

/// Decoding half of the range coder, owning the bit source.
///
/// Tracks the offset `D = V - L` of the code value within the range rather
/// than V itself; frugal mode additionally keeps the raw B-bit window `V`
/// so the disambiguating tail can be measured exactly.
pub(crate) struct Decoder<R: Read> {
    input: BitReader<R>,
    range: CodeValue,
    d: CodeValue,
    div: CodeValue,
    window: CodeValue,
    b_bits: u32,
    half: CodeValue,
    quarter: CodeValue,
    frugal: bool,
    started: bool,
}

impl<R: Read> Decoder<R> {
    pub(crate) fn new(inner: R, cfg: &CodecConfig) -> Self {
        let half = 1u64 << (cfg.code_bits - 1);
        Self {
            input: BitReader::new(inner),
            range: half,
            d: 0,
            div: 1,
            window: 0,
            b_bits: cfg.code_bits,
            half,
            quarter: half >> 1,
            frugal: cfg.frugal_bits,
            started: false,
        }
    }

    /// Fills the decode offset from the bitstream.
    ///
    /// The first frugal start reads B-1 bits (the encoder suppressed the
    /// leading zero); later starts reuse the B excess bits left over from
    /// the previous sequence, pushing one bit back into the source.
    pub(crate) fn start(&mut self) -> Result<()> {
        self.d = 0;
        self.range = self.half;
        if self.frugal {
            if !self.started {
                for _ in 0..self.b_bits - 1 {
                    let bit = self.input.read_bit(self.b_bits)?;
                    self.d = (self.d << 1) | bit as u64;
                }
            } else {
                self.d = self.retrieve_excess_input_bits();
                self.input.unget_bit((self.d & 1) as u32);
                self.d >>= 1;
            }
            self.started = true;
            self.window = self.d;
        } else {
            for _ in 0..self.b_bits {
                let bit = self.input.read_bit(0)?;
                self.d = (self.d << 1) | bit as u64;
            }
        }
        if self.d >= self.half {
            return Err(Error::CorruptInput("initial code value out of range"));
        }
        Ok(())
    }

    fn renormalize(&mut self) -> Result<()> {
        let garbage = if self.frugal { self.b_bits } else { 0 };
        while self.range <= self.quarter {
            self.range <<= 1;
            if self.frugal {
                self.window <<= 1;
            }
            let bit = self.input.read_bit(garbage)?;
            self.d = (self.d << 1) | bit as u64;
            if self.frugal && self.d & 1 != 0 {
                self.window |= 1;
            }
        }
        Ok(())
    }

    /// Translates the current code offset into a frequency target in
    /// `[0, total)`, caching `R / total` for the paired [`Self::decode`].
    /// The clamp to `total - 1` absorbs the last symbol's excess range.
    pub(crate) fn decode_target(&mut self, total: FreqValue) -> FreqValue {
        self.div = self.range / total;
        let target = self.d / self.div;
        if target >= total {
            total - 1
        } else {
            target
        }
    }

    /// Consumes the symbol `[low, high)` out of `total` previously located
    /// via [`Self::decode_target`].
    pub(crate) fn decode(&mut self, low: FreqValue, high: FreqValue, total: FreqValue) -> Result<()> {
        let temp = self.div * low;
        self.d -= temp;
        if high < total {
            self.range = self.div * (high - low);
        } else {
            self.range -= temp;
        }
        self.renormalize()
    }

    /// Decodes one bit against the counts `(c0, c1)`.
    pub(crate) fn decode_binary(&mut self, c0: FreqValue, c1: FreqValue) -> Result<u32> {
        let (lps, c_lps) = if c0 < c1 { (0, c0) } else { (1, c1) };
        self.div = self.range / (c0 + c1);
        let r_lps = self.div * c_lps;
        let bit = if self.d >= self.range - r_lps {
            self.d -= self.range - r_lps;
            self.range = r_lps;
            lps
        } else {
            self.range -= r_lps;
            1 - lps
        };
        self.renormalize()?;
        Ok(bit)
    }

    /// Consumes the encoder's disambiguating tail.
    ///
    /// Without frugal bits the B read-ahead bits were written expressly to
    /// be discarded, so nothing needs doing. With frugal bits the 1..=B
    /// tail bits are measured from the reconstructed lower bound and
    /// consumed, leaving exactly B excess bits in the window.
    pub(crate) fn finish(&mut self) -> Result<()> {
        if !self.frugal {
            return Ok(());
        }
        // Either the real L or L + Half; both give the same tail length.
        let low = (self.window & (self.half - 1)) + self.half - self.d;
        let mut nbits = self.b_bits;
        for n in 1..=self.b_bits {
            let roundup = (1u64 << (self.b_bits - n)) - 1;
            let bits = (low + roundup) >> (self.b_bits - n);
            let value = bits << (self.b_bits - n);
            if low <= value && value + roundup <= low + (self.range - 1) {
                nbits = n;
                break;
            }
        }
        for _ in 0..nbits {
            let bit = self.input.read_bit(self.b_bits)?;
            self.window = (self.window << 1) | bit as u64;
        }
        Ok(())
    }

    /// The B bits read beyond the last valid coding output in frugal mode,
    /// available as the start of a following coding sequence.
    pub(crate) fn retrieve_excess_input_bits(&self) -> CodeValue {
        self.window & (self.half + (self.half - 1))
    }

    /// Wipes the bit buffer so following byte-level input stays aligned.
    pub(crate) fn finish_input(&mut self) {
        self.input.finish();
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.input.bytes_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(frugal: bool) -> CodecConfig {
        CodecConfig {
            frugal_bits: frugal,
            ..CodecConfig::default()
        }
    }

    fn round_trip(cfg: &CodecConfig, triples: &[(u64, u64, u64)]) {
        let mut enc = Encoder::new(Vec::new(), cfg);
        for &(low, high, total) in triples {
            enc.encode(low, high, total).unwrap();
        }
        enc.finish().unwrap();
        enc.flush().unwrap();
        let bytes = enc.into_inner();

        let mut dec = Decoder::new(bytes.as_slice(), cfg);
        dec.start().unwrap();
        for &(low, high, total) in triples {
            let target = dec.decode_target(total);
            assert!(
                target >= low && target < high,
                "target {} outside [{}, {})",
                target,
                low,
                high
            );
            dec.decode(low, high, total).unwrap();
        }
        dec.finish().unwrap();
    }

    #[test]
    fn test_round_trip_fixed_intervals() {
        // (0,1,4),(1,3,4),(3,4,4) repeated: hits both range branches and
        // the end-of-range excess allocation.
        let triples: Vec<(u64, u64, u64)> = (0..3)
            .flat_map(|_| [(0, 1, 4), (1, 3, 4), (3, 4, 4)])
            .collect();
        round_trip(&cfg(false), &triples);
        round_trip(&cfg(true), &triples);
    }

    #[test]
    fn test_round_trip_point_intervals() {
        let triples: Vec<(u64, u64, u64)> = vec![
            (12_345_678, 12_345_679, 100_000_000),
            (0, 1, 100_000_000),
            (99_999_999, 100_000_000, 100_000_000),
        ];
        round_trip(&cfg(false), &triples);
        round_trip(&cfg(true), &triples);
    }

    #[test]
    fn test_frugal_stream_is_shorter() {
        let triples: Vec<(u64, u64, u64)> = vec![(1, 2, 4); 8];

        let mut enc = Encoder::new(Vec::new(), &cfg(false));
        for &(l, h, t) in &triples {
            enc.encode(l, h, t).unwrap();
        }
        enc.finish().unwrap();
        enc.flush().unwrap();
        let plain = enc.into_inner();

        let mut enc = Encoder::new(Vec::new(), &cfg(true));
        for &(l, h, t) in &triples {
            enc.encode(l, h, t).unwrap();
        }
        enc.finish().unwrap();
        enc.flush().unwrap();
        let frugal = enc.into_inner();

        assert!(frugal.len() < plain.len());
    }

    #[test]
    fn test_binary_round_trip() {
        let cfg = cfg(false);
        let bits = [1u32, 0, 0, 1, 1, 1, 0, 1, 0, 0];
        let counts = [(3u64, 9u64), (1, 1), (100, 7), (64, 64), (2, 30)];

        let mut enc = Encoder::new(Vec::new(), &cfg);
        for (i, &bit) in bits.iter().enumerate() {
            let (c0, c1) = counts[i % counts.len()];
            enc.encode_binary(c0, c1, bit).unwrap();
        }
        enc.finish().unwrap();
        enc.flush().unwrap();
        let bytes = enc.into_inner();

        let mut dec = Decoder::new(bytes.as_slice(), &cfg);
        dec.start().unwrap();
        for (i, &bit) in bits.iter().enumerate() {
            let (c0, c1) = counts[i % counts.len()];
            assert_eq!(dec.decode_binary(c0, c1).unwrap(), bit);
        }
        dec.finish().unwrap();
    }

    #[test]
    fn test_corrupt_initial_state_detected() {
        // A stream starting with a one bit puts D >= Half.
        let bytes = [0xFFu8; 8];
        let mut dec = Decoder::new(&bytes[..], &cfg(false));
        assert!(matches!(dec.start(), Err(Error::CorruptInput(_))));
    }

    #[test]
    fn test_frugal_consecutive_sequences() {
        let cfg = cfg(true);
        let first: Vec<(u64, u64, u64)> = vec![(1, 2, 4), (0, 1, 4), (3, 4, 4)];
        let second: Vec<(u64, u64, u64)> = vec![(2, 3, 4), (1, 2, 4)];

        let mut enc = Encoder::new(Vec::new(), &cfg);
        for &(l, h, t) in &first {
            enc.encode(l, h, t).unwrap();
        }
        enc.finish().unwrap();
        // A fresh coding sequence in the same bitstream.
        enc.restart();
        for &(l, h, t) in &second {
            enc.encode(l, h, t).unwrap();
        }
        enc.finish().unwrap();
        enc.flush().unwrap();
        let bytes = enc.into_inner();

        let mut dec = Decoder::new(bytes.as_slice(), &cfg);
        dec.start().unwrap();
        for &(l, h, t) in &first {
            let target = dec.decode_target(t);
            assert!(target >= l && target < h);
            dec.decode(l, h, t).unwrap();
        }
        dec.finish().unwrap();
        dec.start().unwrap();
        for &(l, h, t) in &second {
            let target = dec.decode_target(t);
            assert!(target >= l && target < h);
            dec.decode(l, h, t).unwrap();
        }
        dec.finish().unwrap();
    }
}
