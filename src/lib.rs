//! # Sequitur grammar compression with arithmetic coding
//!
//! A streaming compressor in two stages. The first induces a context-free
//! grammar from the input with the Sequitur algorithm, maintaining two
//! constraints as every symbol is appended:
//!
//! 1. **Digram uniqueness**: no pair of adjacent symbols appears more than
//!    once in the grammar.
//! 2. **Rule utility**: every rule other than the start rule is used at
//!    least twice.
//!
//! The second stage arithmetically codes the grammar with a revised
//! low-precision range coder backed by adaptive Fenwick-tree contexts,
//! producing a compact bitstream that the decoder reverses symbol for
//! symbol.
//!
//! ## Example
//!
//! ```
//! use sequitur_codec::{compress, decompress, CodecConfig};
//!
//! let cfg = CodecConfig::default();
//! let data = b"abcabcabcabcabcabc";
//! let packed = compress(data, &cfg).unwrap();
//! assert_eq!(decompress(&packed, &cfg).unwrap(), data);
//! ```
//!
//! ## Streaming with a memory limit
//!
//! With [`CodecConfig::max_symbols`] set, the compressor evicts the head
//! of the grammar into the output as the limit is crossed, so arbitrarily
//! long inputs compress in bounded memory:
//!
//! ```
//! use sequitur_codec::{decompress, CodecConfig, Compressor};
//!
//! let cfg = CodecConfig { max_symbols: Some(1000), ..CodecConfig::default() };
//! let mut compressor = Compressor::new(Vec::new(), &cfg).unwrap();
//! for b in b"to be or not to be, that is the question. ".iter().cycle().take(10_000) {
//!     compressor.push(*b as u32).unwrap();
//! }
//! let packed = compressor.finish().unwrap();
//! assert_eq!(decompress(&packed, &cfg).unwrap().len(), 10_000);
//! ```
//!
//! The grammar inducer is also usable on its own through [`Sequitur`].
//!
//! Both sides of a stream must agree on the [`CodecConfig`] coding
//! parameters; they are not serialized into the stream.

mod arith;
mod bitio;
mod compress;
mod config;
mod decompress;
mod digram;
mod error;
mod grammar;
mod iter;
mod rule;
mod sequitur;
mod stats;
mod symbol;

#[cfg(test)]
mod tests;

pub use compress::{compress, Compressor};
pub use config::CodecConfig;
pub use decompress::{decompress, Decompressor};
pub use error::{Error, Result};
pub use iter::ExpansionIter;
pub use sequitur::{CompressionStats, GrammarSymbol, Sequitur};
