//! Decompression driver: mirrors the compressor symbol for symbol.

use std::io::{Read, Write};

use crate::arith::Decoder;
use crate::compress::{
    code_is_terminal, code_to_term, registry_full, Keep, END_OF_FILE, FIRST_RULE, KEEP_SYMBOLS,
    SPECIAL_SYMBOLS, START_RULE, STOP_FORGETTING,
};
use crate::config::{CodecConfig, RULE_LEN_TARGET, TERMINAL_TARGET};
use crate::error::{Error, Result};
use crate::grammar::Grammar;
use crate::iter::ExpansionIter;
use crate::stats::{BinaryContext, Context, ContextKind};
use crate::symbol::RuleKey;

/// A decoded `symbol`-context code, or the escape signal whose raw value
/// follows out of band.
enum Sym {
    Code(usize),
    NotKnown,
}

struct State {
    grammar: Grammar,
    /// Rules in transmission order; `(code - FIRST_RULE) / 2` indexes it.
    registry: Vec<RuleKey>,
    symbol: Context,
    lengths: Context,
    keep: Context,
    current_rule: usize,
    forgetting: bool,
}

impl State {
    fn rule_at(&self, code: usize) -> Result<RuleKey> {
        let idx = (code - FIRST_RULE) >> 1;
        let key = *self
            .registry
            .get(idx)
            .ok_or(Error::CorruptInput("reference to unknown rule"))?;
        if !self.grammar.rules.contains_key(key) {
            return Err(Error::CorruptInput("reference to deleted rule"));
        }
        Ok(key)
    }

    /// Reads the next code; a `START_RULE` pulls in the whole rule body
    /// (recursively) and yields the freshly assigned non-terminal code.
    fn get_symbol<R: Read>(&mut self, dec: &mut Decoder<R>) -> Result<Sym> {
        let code = match self.symbol.decode(dec)? {
            None => return Ok(Sym::NotKnown),
            Some(c) => c,
        };

        if code != START_RULE {
            return Ok(Sym::Code(code));
        }

        let n = self.current_rule;
        self.current_rule += 2;
        registry_full(self.registry.len())?;
        let rule = self.grammar.new_rule();
        self.registry.push(rule);
        self.symbol.install(n)?;

        let len = match self.lengths.decode(dec)? {
            Some(len) => len,
            None => {
                let len = dec.decode_target(RULE_LEN_TARGET);
                dec.decode(len, len + 1, RULE_LEN_TARGET)?;
                len as usize
            }
        };

        for _ in 0..len {
            match self.get_symbol(dec)? {
                Sym::Code(x) if !code_is_terminal(x) => {
                    if x < FIRST_RULE {
                        return Err(Error::CorruptInput("reserved code inside a rule body"));
                    }
                    let inner = self.rule_at(x)?;
                    let last = self.grammar.last(rule);
                    let y = self.grammar.new_non_terminal(inner);
                    self.grammar.insert_after(last, y);
                }
                Sym::Code(x) => {
                    if x < SPECIAL_SYMBOLS {
                        return Err(Error::CorruptInput("reserved code inside a rule body"));
                    }
                    let last = self.grammar.last(rule);
                    let y = self.grammar.new_terminal(code_to_term(x));
                    self.grammar.insert_after(last, y);
                }
                Sym::NotKnown => {
                    let x = self.read_raw_terminal(dec)?;
                    self.symbol.install(x)?;
                    let last = self.grammar.last(rule);
                    let y = self.grammar.new_terminal(code_to_term(x));
                    self.grammar.insert_after(last, y);
                }
            }
        }

        Ok(Sym::Code(n))
    }

    fn read_raw_terminal<R: Read>(&mut self, dec: &mut Decoder<R>) -> Result<usize> {
        let x = dec.decode_target(TERMINAL_TARGET);
        dec.decode(x, x + 1, TERMINAL_TARGET)?;
        let x = x as usize;
        if x < SPECIAL_SYMBOLS || !code_is_terminal(x) {
            return Err(Error::CorruptInput("escaped value is not a terminal code"));
        }
        Ok(x)
    }

    /// Writes a rule's full expansion to the output.
    fn reproduce<W: Write>(&self, out: &mut W, rule: RuleKey) -> Result<u64> {
        let mut written = 0;
        for t in ExpansionIter::new(&self.grammar, rule) {
            out.write_all(&[t as u8])?;
            written += 1;
        }
        Ok(written)
    }
}

/// Streaming decompressor.
pub struct Decompressor<R: Read> {
    cfg: CodecConfig,
    dec: Decoder<R>,
}

impl<R: Read> Decompressor<R> {
    pub fn new(input: R, cfg: &CodecConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg: cfg.clone(),
            dec: Decoder::new(input, cfg),
        })
    }

    /// Decodes the whole stream into `out`, returning the number of bytes
    /// produced.
    pub fn decompress_to<W: Write>(mut self, out: &mut W) -> Result<u64> {
        let cfg = self.cfg.clone();
        let cfg = &cfg;
        self.dec.start()?;

        let mut keep = Context::new(KEEP_SYMBOLS, ContextKind::Static, cfg);
        keep.install(Keep::No as usize)?;
        keep.install(Keep::Yes as usize)?;
        keep.install(Keep::Dummy as usize)?;

        let mut file_type = BinaryContext::new(cfg);
        let kind = if file_type.decode(&mut self.dec)? != 0 {
            ContextKind::Static
        } else {
            ContextKind::Dynamic
        };

        let min_code = self.read_point(TERMINAL_TARGET)? as usize;
        let max_code = self.read_point(TERMINAL_TARGET)? as usize;
        let max_rule_len = self.read_point(RULE_LEN_TARGET)? as usize;
        if min_code < SPECIAL_SYMBOLS || max_code < min_code || max_rule_len < 2 {
            return Err(Error::CorruptInput("implausible stream prologue"));
        }

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

        let mut state = State {
            grammar: Grammar::new(cfg),
            registry: Vec::new(),
            symbol,
            lengths,
            keep,
            current_rule: FIRST_RULE,
            forgetting: true,
        };

        let mut written = 0u64;
        loop {
            let current = state.current_rule;

            match state.get_symbol(&mut self.dec)? {
                Sym::NotKnown => {
                    // A terminal not yet in the context.
                    let x = state.read_raw_terminal(&mut self.dec)?;
                    state.symbol.install(x)?;
                    out.write_all(&[code_to_term(x) as u8])?;
                    written += 1;
                }
                Sym::Code(c) if c == END_OF_FILE => break,
                Sym::Code(c) if c == STOP_FORGETTING => {
                    state.forgetting = false;
                }
                Sym::Code(c) if code_is_terminal(c) => {
                    out.write_all(&[code_to_term(c) as u8])?;
                    written += 1;
                }
                Sym::Code(c) => {
                    let rule = state.rule_at(c)?;
                    if c < current && state.forgetting {
                        // An already-known rule while eviction is active:
                        // its keep code follows.
                        let keepi = match state.keep.decode(&mut self.dec)? {
                            Some(0) => Keep::No,
                            Some(1) => Keep::Yes,
                            Some(2) => Keep::Dummy,
                            _ => return Err(Error::CorruptInput("bad keep code")),
                        };
                        if keepi != Keep::Dummy {
                            written += state.reproduce(out, rule)?;
                        }
                        if keepi != Keep::Yes {
                            if state.grammar.rules[rule].use_count > 0 {
                                return Err(Error::CorruptInput(
                                    "rule deleted while still referenced",
                                ));
                            }
                            state.symbol.delete(c);
                            state.grammar.destroy_rule(rule);
                        }
                    } else {
                        written += state.reproduce(out, rule)?;
                    }
                }
            }
        }

        self.dec.finish()?;
        self.dec.finish_input();
        Ok(written)
    }

    /// Reads a value coded as a point interval against `total`.
    fn read_point(&mut self, total: u64) -> Result<u64> {
        let v = self.dec.decode_target(total);
        self.dec.decode(v, v + 1, total)?;
        Ok(v)
    }
}

/// Decompresses a byte slice in one call.
pub fn decompress(input: &[u8], cfg: &CodecConfig) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    Decompressor::new(input, cfg)?.decompress_to(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::compress;

    fn round_trip(data: &[u8], cfg: &CodecConfig) {
        let packed = compress(data, cfg).unwrap();
        let unpacked = decompress(&packed, cfg).unwrap();
        assert_eq!(unpacked, data, "round trip failed for {} bytes", data.len());
    }

    #[test]
    fn test_round_trip_empty() {
        round_trip(b"", &CodecConfig::default());
    }

    #[test]
    fn test_round_trip_single_byte() {
        round_trip(b"a", &CodecConfig::default());
    }

    #[test]
    fn test_round_trip_abc() {
        round_trip(b"abcabcabc", &CodecConfig::default());
    }

    #[test]
    fn test_round_trip_runs() {
        round_trip(b"aaa", &CodecConfig::default());
        round_trip(b"aaaa", &CodecConfig::default());
        round_trip(b"aaaaaaaa", &CodecConfig::default());
    }

    #[test]
    fn test_round_trip_text() {
        let text = b"the quick brown fox jumps over the lazy dog. \
                     the quick brown fox jumps over the lazy dog again.";
        round_trip(text, &CodecConfig::default());
    }

    #[test]
    fn test_round_trip_all_byte_values() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        round_trip(&data, &CodecConfig::default());
    }

    #[test]
    fn test_round_trip_frugal() {
        let cfg = CodecConfig {
            frugal_bits: true,
            ..CodecConfig::default()
        };
        round_trip(b"", &cfg);
        round_trip(b"abracadabra abracadabra", &cfg);
    }

    #[test]
    fn test_round_trip_mps_disabled() {
        let cfg = CodecConfig {
            mps_at_end: false,
            ..CodecConfig::default()
        };
        round_trip(b"banana bandana banana bandana", &cfg);
    }

    #[test]
    fn test_round_trip_delimiter() {
        let cfg = CodecConfig {
            delimiter: Some(b'\n' as u32),
            ..CodecConfig::default()
        };
        round_trip(b"foo\nfoo\nfoo\nbar\nbar\n", &cfg);
    }

    #[test]
    fn test_round_trip_with_forgetting() {
        let cfg = CodecConfig {
            max_symbols: Some(64),
            ..CodecConfig::default()
        };
        let data: Vec<u8> = b"it was the best of times, it was the worst of times, \
                              it was the age of wisdom, it was the age of foolishness"
            .iter()
            .cycle()
            .take(4000)
            .copied()
            .collect();
        round_trip(&data, &cfg);
    }

    #[test]
    fn test_round_trip_random_with_forgetting() {
        // Deterministic pseudo-random bytes; incompressible input drives
        // the KEEP_NO / KEEP_DUMMY paths hard.
        let cfg = CodecConfig {
            max_symbols: Some(200),
            ..CodecConfig::default()
        };
        let mut seed = 0x2545F4914F6CDD1Du64;
        let data: Vec<u8> = (0..8192)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                (seed >> 32) as u8
            })
            .collect();
        round_trip(&data, &cfg);
    }

    #[test]
    fn test_truncated_stream_detected() {
        let cfg = CodecConfig::default();
        let packed = compress(b"hello hello hello hello", &cfg).unwrap();
        // Cut the stream short; the decoder must fail, not loop.
        let cut = &packed[..packed.len().saturating_sub(4).max(1)];
        assert!(decompress(cut, &cfg).is_err());
    }

    #[test]
    fn test_garbage_stream_detected() {
        let cfg = CodecConfig::default();
        // All ones makes the initial code value land out of range.
        let garbage = vec![0xFFu8; 32];
        assert!(decompress(&garbage, &cfg).is_err());
    }
}
