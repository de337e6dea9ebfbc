//! Compression driver: streams grammar symbols into the coder.
//!
//! The coder alphabet interleaves three reserved codes, odd terminal codes
//! and even non-terminal codes. A rule reaching the coder for the first
//! time is sent as `START_RULE`, its length, then its body; later
//! references send only the assigned code. While memory-pressure eviction
//! is active, every top-level rule reference is followed by a `keep` code
//! telling the decoder whether the rule stays in memory.

use std::io::Write;

use crate::arith::Encoder;
use crate::config::{CodecConfig, RULE_LEN_TARGET, TERMINAL_TARGET};
use crate::error::{Error, Result};
use crate::grammar::Grammar;
use crate::sequitur::Sequitur;
use crate::stats::{BinaryContext, Coded, Context, ContextKind};
use crate::symbol::{RuleKey, SymbolKey, SymbolValue};

pub(crate) const START_RULE: usize = 0;
pub(crate) const END_OF_FILE: usize = 1;
pub(crate) const STOP_FORGETTING: usize = 2;
pub(crate) const SPECIAL_SYMBOLS: usize = 3;
pub(crate) const FIRST_RULE: usize = 4;

/// Cap on rules simultaneously known to one stream.
pub(crate) const RULE_REGISTRY_SIZE: usize = 1_000_000;

#[inline]
pub(crate) fn term_to_code(t: u32) -> usize {
    ((t as usize) << 1) + SPECIAL_SYMBOLS
}

#[inline]
pub(crate) fn code_to_term(code: usize) -> u32 {
    ((code - SPECIAL_SYMBOLS) >> 1) as u32
}

#[inline]
pub(crate) fn code_is_terminal(code: usize) -> bool {
    code & 1 == 1
}

/// Whether a rule is to be kept in memory, deleted, or neither reproduced
/// nor kept (its body was just transmitted for the only time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keep {
    No = 0,
    Yes = 1,
    Dummy = 2,
    /// Sentinel: no keep code accompanies this reference.
    Length = 3,
}

pub(crate) const KEEP_SYMBOLS: usize = 3;

/// The per-stream coding state, created by the prologue.
struct Streams {
    symbol: Context,
    lengths: Context,
    keep: Context,
    current_rule: usize,
    forgetting: bool,
}

impl Streams {
    fn encode_known<W: Write>(
        &mut self,
        enc: &mut Encoder<W>,
        code: usize,
    ) -> Result<()> {
        let outcome = self.symbol.encode(enc, code)?;
        debug_assert_eq!(outcome, Coded::Known, "reserved or rule code escaped");
        Ok(())
    }

    /// Encodes a terminal, installing it on first sight via the escape
    /// round trip.
    fn encode_terminal<W: Write>(&mut self, enc: &mut Encoder<W>, t: u32) -> Result<()> {
        let code = term_to_code(t);
        if self.symbol.encode(enc, code)? == Coded::NotKnown {
            enc.encode(code as u64, code as u64 + 1, TERMINAL_TARGET)?;
            self.symbol.install(code)?;
        }
        Ok(())
    }

    /// Encodes a reference to an already-transmitted rule, with its keep
    /// code when eviction is active.
    fn encode_rule_ref<W: Write>(
        &mut self,
        enc: &mut Encoder<W>,
        index: usize,
        keep: Keep,
    ) -> Result<()> {
        self.encode_known(enc, index)?;
        if keep != Keep::Length && self.forgetting {
            let outcome = self.keep.encode(enc, keep as usize)?;
            debug_assert_eq!(outcome, Coded::Known);
            if matches!(keep, Keep::No | Keep::Dummy) {
                // The code will not recur; reclaim its probability mass.
                self.symbol.delete(index);
            }
        }
        Ok(())
    }

    /// First transmission of a rule: assign its code, then send
    /// `START_RULE`, the body length, and the body itself, descending into
    /// subordinate rules that have not been transmitted either.
    fn output_rule<W: Write>(
        &mut self,
        enc: &mut Encoder<W>,
        g: &mut Grammar,
        r: RuleKey,
    ) -> Result<()> {
        let n = self.current_rule;
        self.current_rule += 2;
        g.rules[r].index = n;

        self.encode_known(enc, START_RULE)?;
        self.symbol.install(n)?;

        let len = g.rule_len(r);
        if self.lengths.encode(enc, len)? == Coded::NotKnown {
            enc.encode(len as u64, len as u64 + 1, RULE_LEN_TARGET)?;
        }

        let guard = g.rules[r].guard;
        let mut s = g.first(r);
        while s != guard {
            match g.value(s) {
                SymbolValue::Terminal(t) => self.encode_terminal(enc, t)?,
                SymbolValue::NonTerminal(inner) => {
                    if g.rules[inner].index == 0 {
                        self.output_rule(enc, g, inner)?;
                    } else {
                        let index = g.rules[inner].index;
                        self.encode_rule_ref(enc, index, Keep::Length)?;
                    }
                }
                SymbolValue::Guard(_) => unreachable!(),
            }
            s = g.next(s);
        }
        Ok(())
    }

    /// Emits one symbol of the start rule to the coder and detaches it.
    fn forget<W: Write>(
        &mut self,
        enc: &mut Encoder<W>,
        g: &mut Grammar,
        s: SymbolKey,
    ) -> Result<()> {
        match g.value(s) {
            SymbolValue::Terminal(t) => {
                self.encode_terminal(enc, t)?;
                g.destroy_symbol(s);
            }
            SymbolValue::NonTerminal(r) => {
                g.destroy_symbol(s);

                if g.rules[r].use_count > 0 {
                    // The grammar still uses this rule.
                    if g.rules[r].index == 0 {
                        self.output_rule(enc, g, r)?;
                    } else {
                        let index = g.rules[r].index;
                        self.encode_rule_ref(enc, index, Keep::Yes)?;
                    }
                } else {
                    // Last use: transmit if never sent, then delete.
                    if g.rules[r].index == 0 {
                        self.output_rule(enc, g, r)?;
                        if self.forgetting {
                            let index = g.rules[r].index;
                            self.encode_rule_ref(enc, index, Keep::Dummy)?;
                        }
                    } else {
                        let index = g.rules[r].index;
                        self.encode_rule_ref(enc, index, Keep::No)?;
                    }
                    g.destroy_rule(r);
                }
            }
            SymbolValue::Guard(_) => unreachable!("guards are never forgotten"),
        }
        Ok(())
    }
}

/// Streaming compressor.
///
/// Feed input with [`Compressor::push`] (or through [`std::io::Write`]) and
/// close the stream with [`Compressor::finish`]. With
/// [`CodecConfig::max_symbols`] set, the grammar head is evicted to the
/// coder as the limit is crossed; otherwise the whole grammar is built
/// first and coded with static contexts.
pub struct Compressor<W: Write> {
    cfg: CodecConfig,
    seq: Sequitur,
    enc: Encoder<W>,
    streams: Option<Streams>,
    min_terminal: u32,
    max_terminal: u32,
    any_input: bool,
}

impl<W: Write> Compressor<W> {
    pub fn new(writer: W, cfg: &CodecConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg: cfg.clone(),
            seq: Sequitur::new(cfg)?,
            enc: Encoder::new(writer, cfg),
            streams: None,
            min_terminal: 0,
            max_terminal: 0,
            any_input: false,
        })
    }

    /// Appends one input symbol, evicting grammar under memory pressure.
    pub fn push(&mut self, value: u32) -> Result<()> {
        if term_to_code(value) as u64 >= TERMINAL_TARGET {
            // The prologue codes terminal bounds against a fixed total.
            return Err(Error::InvalidConfig("terminal value exceeds the codable range"));
        }
        if self.any_input {
            self.min_terminal = self.min_terminal.min(value);
            self.max_terminal = self.max_terminal.max(value);
        } else {
            self.min_terminal = value;
            self.max_terminal = value;
            self.any_input = true;
        }

        self.seq.push(value);

        if let Some(max_symbols) = self.cfg.max_symbols {
            if self.seq.grammar.symbol_count() > max_symbols {
                if self.streams.is_none() {
                    log::debug!("symbol limit {} reached, forgetting grammar head", max_symbols);
                    self.start(false)?;
                }
                let guard = self.seq.grammar.rules[self.seq.start].guard;
                let first = self.seq.grammar.first(self.seq.start);
                if first != guard {
                    let streams = self.streams.as_mut().expect("streams started above");
                    streams.forget(&mut self.enc, &mut self.seq.grammar, first)?;
                }
            }
        }
        Ok(())
    }

    /// Writes the stream prologue and builds the coding contexts. With
    /// `all_input_read` the symbol and lengths contexts are static, which
    /// codes slightly shorter; mid-input they must stay dynamic so unseen
    /// symbols and lengths can escape.
    fn start(&mut self, all_input_read: bool) -> Result<()> {
        let cfg = &self.cfg;

        let mut keep = Context::new(KEEP_SYMBOLS, ContextKind::Static, cfg);
        keep.install(Keep::No as usize)?;
        keep.install(Keep::Yes as usize)?;
        keep.install(Keep::Dummy as usize)?;

        let mut file_type = BinaryContext::new(cfg);
        file_type.encode(&mut self.enc, all_input_read as u32)?;
        let kind = if all_input_read {
            ContextKind::Static
        } else {
            ContextKind::Dynamic
        };

        let min_code = term_to_code(self.min_terminal);
        let max_code = term_to_code(self.max_terminal);
        self.enc
            .encode(min_code as u64, min_code as u64 + 1, TERMINAL_TARGET)?;
        self.enc
            .encode(max_code as u64, max_code as u64 + 1, TERMINAL_TARGET)?;

        let max_rule_len = self.seq.grammar.max_rule_len;
        self.enc
            .encode(max_rule_len as u64, max_rule_len as u64 + 1, RULE_LEN_TARGET)?;

        let mut symbol = Context::new(SPECIAL_SYMBOLS + max_code - min_code + 1, kind, cfg);
        symbol.install(START_RULE)?;
        symbol.install(END_OF_FILE)?;
        symbol.install(STOP_FORGETTING)?;
        let mut code = min_code;
        while code <= max_code {
            symbol.install(code)?;
            code += 2;
        }

        let mut lengths = Context::new(max_rule_len, kind, cfg);
        for l in 2..=max_rule_len {
            lengths.install(l)?;
        }

        // The lengths alphabet is now frozen into the stream.
        self.seq.grammar.track_rule_len = false;

        self.streams = Some(Streams {
            symbol,
            lengths,
            keep,
            current_rule: FIRST_RULE,
            forgetting: true,
        });
        Ok(())
    }

    /// Drains the remaining grammar into the coder and closes the stream,
    /// returning the writer.
    pub fn finish(mut self) -> Result<W> {
        if self.streams.is_none() {
            self.start(true)?;
        }
        let streams = self.streams.as_mut().expect("streams started above");

        // No more rules will be deleted from memory.
        streams.encode_known(&mut self.enc, STOP_FORGETTING)?;
        streams.forgetting = false;

        let guard = self.seq.grammar.rules[self.seq.start].guard;
        loop {
            let first = self.seq.grammar.first(self.seq.start);
            if first == guard {
                break;
            }
            streams.forget(&mut self.enc, &mut self.seq.grammar, first)?;
        }

        streams.encode_known(&mut self.enc, END_OF_FILE)?;
        self.enc.finish()?;
        self.enc.flush()?;
        Ok(self.enc.into_inner())
    }

    /// Bytes emitted so far (buffered bits excluded).
    pub fn bytes_written(&self) -> u64 {
        self.enc.bytes_written()
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for &b in buf {
            self.push(b as u32)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Compresses a byte slice in one call.
pub fn compress(input: &[u8], cfg: &CodecConfig) -> Result<Vec<u8>> {
    let mut compressor = Compressor::new(Vec::new(), cfg)?;
    for &b in input {
        compressor.push(b as u32)?;
    }
    compressor.finish()
}

// Keep the registry bound visible to both halves of the driver.
pub(crate) fn registry_full(len: usize) -> Result<()> {
    if len >= RULE_REGISTRY_SIZE {
        return Err(Error::NoMemory("rule registry exhausted"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_interleave() {
        assert_eq!(term_to_code(0), 3);
        assert_eq!(term_to_code(1), 5);
        assert_eq!(code_to_term(3), 0);
        assert_eq!(code_to_term(5), 1);
        assert!(code_is_terminal(3));
        assert!(!code_is_terminal(FIRST_RULE));
        // Rule codes stay even, terminals odd, never colliding.
        for t in 0..50u32 {
            assert!(code_is_terminal(term_to_code(t)));
        }
    }

    #[test]
    fn test_compress_emits_output() {
        let out = compress(b"abcabcabc", &CodecConfig::default()).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn test_empty_input_stream_is_tiny() {
        let out = compress(b"", &CodecConfig::default()).unwrap();
        // Prologue, STOP_FORGETTING, END_OF_FILE, finish bits.
        assert!(out.len() < 16, "empty stream took {} bytes", out.len());
    }

    #[test]
    fn test_write_trait_matches_push() {
        let cfg = CodecConfig::default();
        let data = b"mississippi mississippi";

        let a = compress(data, &cfg).unwrap();

        let mut c = Compressor::new(Vec::new(), &cfg).unwrap();
        c.write_all(data).unwrap();
        let b = c.finish().unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_repetitive_beats_prologue_overhead() {
        let data: Vec<u8> = b"xy".iter().cycle().take(20_000).copied().collect();
        let out = compress(&data, &CodecConfig::default()).unwrap();
        assert!(
            out.len() * 100 < data.len(),
            "{} bytes compressed to {}",
            data.len(),
            out.len()
        );
    }
}
