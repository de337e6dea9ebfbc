//! Adaptive statistical contexts over Fenwick cumulative-frequency trees.
//!
//! Slot 0 of a tree is unused and slot 1 holds the escape (zero-frequency)
//! symbol; user symbols start at slot 2. The escape probability follows a
//! variation of the XC zero-frequency method: slot 1 is kept equal to the
//! singleton count, which for dynamic contexts is falsely pre-incremented
//! so the value can be used directly without checking the context kind on
//! every coded symbol. Static contexts keep it at zero and can never code
//! a novel symbol.

use std::io::{Read, Write};

use crate::arith::{Decoder, Encoder};
use crate::config::CodecConfig;
use crate::error::{Error, Result};

/// Minimum per-symbol increment after repeated halvings.
const MIN_INCR: i64 = 1;

/// Strips the lowest set bit: parent walk for prefix sums.
#[inline(always)]
fn back(i: usize) -> usize {
    i & (i - 1)
}

/// Adds the lowest set bit: successor walk for point updates.
#[inline(always)]
fn forw(i: usize) -> usize {
    i + (i & i.wrapping_neg())
}

/// Whether a context may install new symbols after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextKind {
    /// Fixed alphabet, no escape probability.
    Static,
    /// Growable alphabet with escape-symbol coding.
    Dynamic,
}

/// Outcome of coding a symbol against a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub(crate) enum Coded {
    /// The symbol itself was coded.
    Known,
    /// The escape symbol was coded; the caller must follow with an
    /// out-of-band code for the raw value.
    NotKnown,
}

/// A cumulative-frequency context.
pub(crate) struct Context {
    tree: Vec<i64>,
    initial_size: usize,
    /// Highest installed slot.
    length: usize,
    /// Tree capacity; always a power of two. Valid slots are
    /// `1..max_length`.
    max_length: usize,
    total: i64,
    n_symbols: usize,
    n_singletons: i64,
    kind: ContextKind,
    incr: i64,
    most_freq_symbol: Option<usize>,
    most_freq_count: i64,
    most_freq_pos: i64,
    max_frequency: i64,
    mps_at_end: bool,
}

impl Context {
    /// Creates a context able to hold `length` user symbols before growing.
    pub(crate) fn new(length: usize, kind: ContextKind, cfg: &CodecConfig) -> Self {
        // Symbol 0 lives at slot 2; round up to the tree's power of two.
        let mut size = 1;
        while size < length + 2 {
            size <<= 1;
        }
        let mut ctx = Self {
            tree: vec![0; size],
            initial_size: size,
            length: 1,
            max_length: size,
            total: 0,
            n_symbols: 1,
            n_singletons: 0,
            kind,
            incr: 1i64 << cfg.freq_bits,
            most_freq_symbol: None,
            most_freq_count: 0,
            most_freq_pos: 0,
            max_frequency: 1i64 << cfg.freq_bits,
            mps_at_end: cfg.mps_at_end,
        };
        ctx.init_zero_freq();
        ctx.adjust_zero_freq();
        ctx
    }

    /// The escape count. The singleton counter doubles as the stored
    /// zero-frequency probability, see the module docs.
    #[inline]
    fn zero_freq_prob(&self) -> i64 {
        self.n_singletons
    }

    fn init_zero_freq(&mut self) {
        if self.kind == ContextKind::Dynamic {
            self.n_singletons += self.incr;
        } else {
            self.n_singletons = 0;
        }
    }

    /// Brings slot 1 back in line with the singleton count after an update.
    fn adjust_zero_freq(&mut self) {
        let diff = self.zero_freq_prob() - self.tree[1];
        if diff != 0 {
            let high = self.tree[1];
            self.bump(1, 0, high, diff);
        }
    }

    /// Adds `inc` to `slot`'s count (Fenwick point update) and maintains
    /// the most-probable-symbol cache. `low`/`high` are the slot's interval
    /// before the update.
    fn bump(&mut self, slot: usize, low: i64, high: i64, inc: i64) {
        let mut i = slot;
        loop {
            self.tree[i] += inc;
            i = forw(i);
            if i >= self.max_length {
                break;
            }
        }
        self.total += inc;

        if !self.mps_at_end {
            return;
        }
        if Some(slot) == self.most_freq_symbol {
            self.most_freq_count += inc;
        } else if high - low + inc > self.most_freq_count {
            self.most_freq_symbol = Some(slot);
            self.most_freq_count = high - low + inc;
            self.most_freq_pos = low;
        } else if self
            .most_freq_symbol
            .map_or(false, |mps| slot < mps)
        {
            self.most_freq_pos += inc;
        }
    }

    /// The `[low, high)` frequency interval of `slot`.
    ///
    /// Walks `slot` and `slot - 1` only up to their shared ancestor and
    /// sums the disjoint branches once; every coded symbol performs exactly
    /// one interval lookup, so this path matters.
    fn interval(&self, slot: usize) -> (i64, i64) {
        let high = self.tree[slot];
        let parent = back(slot);

        let mut low = 0;
        let mut s = slot - 1;
        while s != parent {
            low += self.tree[s];
            s = back(s);
        }

        let mut shared = 0;
        while s > 0 {
            shared += self.tree[s];
            s = back(s);
        }
        (shared + low, shared + high)
    }

    /// Installs `symbol`, growing the tree as needed. The new symbol starts
    /// at the current increment (a singleton).
    pub(crate) fn install(&mut self, symbol: usize) -> Result<()> {
        let slot = symbol + 2;

        while slot >= self.max_length {
            self.tree.resize(self.max_length * 2, 0);
            // The first element of the top half summarizes the entire
            // bottom half; valid because the length is a power of two.
            self.tree[self.max_length] = self.total;
            self.max_length <<= 1;
        }

        if (self.n_symbols + 1) << 1 >= self.max_frequency as usize {
            // One more symbol and halving could no longer reduce the total.
            return Err(Error::TooManySymbols);
        }

        if slot > self.length {
            self.length = slot;
        }
        self.n_symbols += 1;

        let (low, high) = self.interval(slot);
        let inc = self.incr;
        self.bump(slot, low, high, inc);
        if self.kind == ContextKind::Dynamic {
            self.n_singletons += inc;
        }
        self.adjust_zero_freq();

        while self.total > self.max_frequency {
            self.halve();
        }
        Ok(())
    }

    /// Retracts a symbol that will never recur by zeroing its count.
    pub(crate) fn delete(&mut self, symbol: usize) {
        let slot = symbol + 2;
        let (low, high) = self.interval(slot);
        self.bump(slot, low, high, low - high);
    }

    /// Encodes `symbol`, or the escape symbol when it has no probability
    /// mass yet; the caller then codes the raw value out of band.
    pub(crate) fn encode<W: Write>(&mut self, enc: &mut Encoder<W>, symbol: usize) -> Result<Coded> {
        let requested = symbol + 2;

        let (mut slot, mut low, mut high) = if requested < self.max_length {
            if Some(requested) == self.most_freq_symbol {
                let low = self.most_freq_pos;
                (requested, low, low + self.most_freq_count)
            } else {
                let (low, high) = self.interval(requested);
                (requested, low, high)
            }
        } else {
            (requested, 0, 0)
        };

        if low == high {
            assert!(
                self.zero_freq_prob() != 0,
                "cannot code a zero-probability novel symbol"
            );
            slot = 1;
            if Some(slot) == self.most_freq_symbol {
                low = self.most_freq_pos;
                high = low + self.most_freq_count;
            } else {
                let (l, h) = self.interval(slot);
                low = l;
                high = h;
            }
        }

        // Rotate the most probable symbol's interval to the end of the
        // range; the original bounds are still needed for the stats update.
        let (low_w, high_w) = if self.mps_at_end {
            match self.most_freq_symbol {
                Some(mps) if slot == mps => {
                    (self.total - self.most_freq_count, self.total)
                }
                Some(mps) if slot > mps => {
                    (low - self.most_freq_count, high - self.most_freq_count)
                }
                _ => (low, high),
            }
        } else {
            (low, high)
        };

        enc.encode(low_w as u64, high_w as u64, self.total as u64)?;

        if slot != 1 {
            if self.kind == ContextKind::Dynamic && high - low == self.incr {
                // A singleton is being promoted.
                self.n_singletons -= self.incr;
            }
            let inc = self.incr;
            self.bump(slot, low, high, inc);
        }
        self.adjust_zero_freq();
        while self.total > self.max_frequency {
            self.halve();
        }

        Ok(if slot == 1 { Coded::NotKnown } else { Coded::Known })
    }

    /// Decodes the next symbol, or `None` when the escape symbol was coded
    /// and the raw value follows out of band.
    pub(crate) fn decode<R: Read>(&mut self, dec: &mut Decoder<R>) -> Result<Option<usize>> {
        let total = self.total;
        let mut target = dec.decode_target(total as u64) as i64;

        let (slot, low, high);
        if self.mps_at_end && target >= total - self.most_freq_count {
            // Most probable symbol, no tree descent needed.
            dec.decode(
                (total - self.most_freq_count) as u64,
                total as u64,
                total as u64,
            )?;
            slot = self.most_freq_symbol.expect("MPS hit without a cached MPS");
            low = self.most_freq_pos;
            high = low + self.most_freq_count;
        } else {
            if self.mps_at_end && target >= self.most_freq_pos {
                // Undo the rotation before descending.
                target += self.most_freq_count;
            }

            let mut lo = 0i64;
            let mut idx = 0usize;
            let mut mid = self.max_length >> 1;
            while mid > 0 {
                if self.tree[idx + mid] + lo <= target {
                    lo += self.tree[idx + mid];
                    idx += mid;
                }
                mid >>= 1;
            }
            slot = idx + 1;
            low = lo;

            // The descent produced the lower bound; derive the upper bound
            // from the shared-parent walk instead of a second full lookup.
            high = if slot & 1 == 1 {
                low + self.tree[slot]
            } else {
                let parent = back(slot);
                let mut h = low;
                let mut s = slot - 1;
                while s != parent {
                    h -= self.tree[s];
                    s = back(s);
                }
                h + self.tree[slot]
            };

            if self.mps_at_end && low >= self.most_freq_pos {
                // Interval was shifted down by the rotation.
                dec.decode(
                    (low - self.most_freq_count) as u64,
                    (high - self.most_freq_count) as u64,
                    total as u64,
                )?;
            } else {
                dec.decode(low as u64, high as u64, total as u64)?;
            }
        }

        if slot != 1 {
            if self.kind == ContextKind::Dynamic && high - low == self.incr {
                self.n_singletons -= self.incr;
            }
            let inc = self.incr;
            self.bump(slot, low, high, inc);
        }
        self.adjust_zero_freq();
        while self.total > self.max_frequency {
            self.halve();
        }

        Ok(if slot == 1 { None } else { Some(slot - 2) })
    }

    /// Halves every count in one linear pass, tracking per-level old and
    /// new contributions to keep the Fenwick prefix-sum shape intact, then
    /// recounts singletons and refreshes the MPS cache.
    fn halve(&mut self) {
        self.incr = (self.incr + MIN_INCR) >> 1;
        if self.incr < MIN_INCR {
            self.incr = MIN_INCR;
        }
        self.n_singletons = self.incr;
        let incr = self.incr;

        let mut old_values = [0i64; 64];
        let mut new_values = [0i64; 64];
        for i in 1..self.max_length {
            let level = i.trailing_zeros() as usize;
            old_values[level] = self.tree[i];

            let mut sum_old = 0;
            let mut sum_new = 0;
            for l in 0..level {
                sum_old += old_values[l];
                sum_new += new_values[l];
            }
            self.tree[i] -= sum_old;
            self.total -= self.tree[i] >> 1;
            self.tree[i] -= self.tree[i] >> 1;
            if self.tree[i] == incr && i != 1 {
                self.n_singletons += incr;
            }
            self.tree[i] += sum_new;

            new_values[level] = self.tree[i];
        }

        if self.kind == ContextKind::Static {
            self.n_singletons = 0;
        }

        // Rounding may leave the cached count off by one; recompute it.
        if let Some(mps) = self.most_freq_symbol {
            let (low, high) = self.interval(mps);
            self.most_freq_count = high - low;
            self.most_freq_pos = low;
        }
        self.adjust_zero_freq();
    }

    /// Resets the context to its initial size without destroying it.
    #[allow(dead_code)]
    pub(crate) fn purge(&mut self) {
        self.tree.clear();
        self.tree.resize(self.initial_size, 0);
        self.length = 1;
        self.total = 0;
        self.n_symbols = 1;
        self.max_length = self.initial_size;
        self.most_freq_symbol = None;
        self.most_freq_count = 0;
        self.most_freq_pos = 0;
        self.incr = self.max_frequency;
        self.n_singletons = 0;
        self.init_zero_freq();
        self.adjust_zero_freq();
    }

    #[cfg(test)]
    pub(crate) fn count_of(&self, symbol: usize) -> i64 {
        let (low, high) = self.interval(symbol + 2);
        high - low
    }

    #[cfg(test)]
    pub(crate) fn total(&self) -> i64 {
        self.total
    }

    #[cfg(test)]
    pub(crate) fn check_total_consistent(&self) -> bool {
        // total must equal the prefix sum over the whole tree, escape
        // included.
        let mut sum = 0;
        let mut s = self.max_length - 1;
        while s > 0 {
            sum += self.tree[s];
            s = back(s);
        }
        sum == self.total && self.total <= self.max_frequency
    }

    #[cfg(test)]
    pub(crate) fn most_freq_symbol(&self) -> Option<usize> {
        self.most_freq_symbol
    }

    #[cfg(test)]
    pub(crate) fn check_intervals_tile(&self) -> bool {
        // Successive intervals must tile [0, total): each slot's low is the
        // sum of the widths below it.
        let mut expected_low = 0;
        for slot in 1..self.max_length {
            let (low, high) = self.interval(slot);
            if low != expected_low || high < low {
                return false;
            }
            expected_low = high;
        }
        expected_low == self.total
    }
}

/// A two-symbol context: a pair of counts and a normalized increment.
pub(crate) struct BinaryContext {
    c0: i64,
    c1: i64,
    incr: i64,
    max_frequency: i64,
}

impl BinaryContext {
    pub(crate) fn new(cfg: &CodecConfig) -> Self {
        let incr = 1i64 << (cfg.freq_bits - 1);
        Self {
            c0: incr,
            c1: incr,
            incr,
            max_frequency: 1i64 << cfg.freq_bits,
        }
    }

    fn update(&mut self, bit: u32) {
        if bit == 0 {
            self.c0 += self.incr;
        } else {
            self.c1 += self.incr;
        }
        if self.c0 + self.c1 > self.max_frequency {
            self.c0 = (self.c0 + 1) >> 1;
            self.c1 = (self.c1 + 1) >> 1;
            self.incr = (self.incr + MIN_INCR) >> 1;
        }
    }

    pub(crate) fn encode<W: Write>(&mut self, enc: &mut Encoder<W>, bit: u32) -> Result<()> {
        enc.encode_binary(self.c0 as u64, self.c1 as u64, bit)?;
        self.update(bit);
        Ok(())
    }

    pub(crate) fn decode<R: Read>(&mut self, dec: &mut Decoder<R>) -> Result<u32> {
        let bit = dec.decode_binary(self.c0 as u64, self.c1 as u64)?;
        self.update(bit);
        Ok(bit)
    }
}
