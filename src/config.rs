use crate::error::{Error, Result};

/// Frequency total used to code terminal values and the min/max terminal
/// prologue fields as point intervals.
pub(crate) const TERMINAL_TARGET: u64 = 100_000_000;

/// Frequency total used to code rule lengths outside the `lengths` context.
pub(crate) const RULE_LEN_TARGET: u64 = 10_000;

/// Configuration shared by the compressor and decompressor.
///
/// Both sides of a stream must agree on every field except `max_symbols`
/// and `hash_memory`; none of them are serialized into the stream.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Code-range precision B in bits. The coder state spans `[0, 2^B)`.
    pub code_bits: u32,

    /// Frequency precision F in bits; context totals are kept `<= 2^F`.
    /// Must satisfy `F <= B - 2`.
    pub freq_bits: u32,

    /// Suppress the redundant leading zero bit and emit only 1-3
    /// disambiguating tail bits instead of all B bits of L.
    pub frugal_bits: bool,

    /// Keep the most probable symbol's interval at the end of the coding
    /// range, where the excess-range approximation is cheapest.
    pub mps_at_end: bool,

    /// Minimum number of digram occurrences required to form a rule.
    pub min_occurrences: u32,

    /// Terminal value across which no rule may be formed.
    pub delimiter: Option<u32>,

    /// Evict ("forget") the head of the start rule once the grammar holds
    /// more than this many symbols. `None` builds the whole grammar first.
    pub max_symbols: Option<usize>,

    /// Memory budget in bytes for the digram hash table.
    pub hash_memory: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            code_bits: 32,
            freq_bits: 27,
            frugal_bits: false,
            mps_at_end: true,
            min_occurrences: 2,
            delimiter: None,
            max_symbols: None,
            hash_memory: 4_000_000,
        }
    }
}

impl CodecConfig {
    /// Checks the parameter constraints the coder and model depend on.
    pub fn validate(&self) -> Result<()> {
        if self.code_bits < 29 || self.code_bits > 32 {
            // The prologue codes point intervals against a total of 10^8,
            // which must fit below Quarter = 2^(B-2).
            return Err(Error::InvalidConfig("code_bits must be in 29..=32"));
        }
        if self.freq_bits + 2 > self.code_bits {
            return Err(Error::InvalidConfig("freq_bits must be <= code_bits - 2"));
        }
        if self.freq_bits < 9 {
            return Err(Error::InvalidConfig("freq_bits too small to hold a context"));
        }
        if self.min_occurrences < 2 || self.min_occurrences > 32 {
            return Err(Error::InvalidConfig("min_occurrences must be in 2..=32"));
        }
        if self.hash_memory < 4096 {
            return Err(Error::InvalidConfig("hash_memory below minimum table size"));
        }
        Ok(())
    }

    /// Width of a digram-index slot group: the number of stored occurrences
    /// that, together with the current digram, complete a rule.
    pub(crate) fn k_width(&self) -> usize {
        (self.min_occurrences - 1) as usize
    }
}
