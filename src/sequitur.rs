//! The public grammar-induction driver.

use crate::config::CodecConfig;
use crate::error::Result;
use crate::grammar::Grammar;
use crate::iter::ExpansionIter;
use crate::symbol::{RuleKey, SymbolValue};

/// One symbol of a rule's right hand, as exposed by [`Sequitur::grammar_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarSymbol {
    /// A terminal value from the input alphabet.
    Terminal(u32),
    /// A reference to the rule with this view number.
    Rule(usize),
}

/// Online Sequitur grammar inducer.
///
/// Appending symbols to the start rule maintains two constraints:
/// 1. **Digram uniqueness**: no digram appears more than once.
/// 2. **Rule utility**: every rule other than the start rule is referenced
///    at least `min_occurrences` times.
///
/// ```
/// use sequitur_codec::{CodecConfig, Sequitur};
///
/// let mut seq = Sequitur::new(&CodecConfig::default()).unwrap();
/// seq.extend("abcabcabc".bytes().map(u32::from));
///
/// let reconstructed: Vec<u32> = seq.iter().collect();
/// assert_eq!(reconstructed.len(), 9);
/// ```
pub struct Sequitur {
    pub(crate) grammar: Grammar,
    pub(crate) start: RuleKey,
    length: usize,
}

impl Sequitur {
    pub fn new(cfg: &CodecConfig) -> Result<Self> {
        cfg.validate()?;
        let mut grammar = Grammar::new(cfg);
        let start = grammar.new_rule();
        Ok(Self {
            grammar,
            start,
            length: 0,
        })
    }

    /// Appends a value to the start rule and enforces the constraints.
    pub fn push(&mut self, value: u32) {
        let last = self.grammar.last(self.start);
        let y = self.grammar.new_terminal(value);
        self.grammar.insert_after(last, y);
        let prev = self.grammar.prev(y);
        self.grammar.check(prev);
        self.length += 1;
    }

    /// Appends every value of an iterator.
    pub fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        for value in iter {
            self.push(value);
        }
    }

    /// Number of values appended so far.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Iterates the reconstructed input sequence.
    pub fn iter(&self) -> ExpansionIter<'_> {
        ExpansionIter::new(&self.grammar, self.start)
    }

    /// The rules in discovery order, start rule first, with references
    /// numbered by position in the returned vector.
    ///
    /// This is the structure behind a printable grammar; rendering it is
    /// the caller's business.
    pub fn grammar_view(&self) -> Vec<Vec<GrammarSymbol>> {
        let mut order: Vec<RuleKey> = vec![self.start];
        let mut number_of = std::collections::BTreeMap::new();
        number_of.insert(self.start, 0usize);

        let mut i = 0;
        while i < order.len() {
            let rule = order[i];
            let guard = self.grammar.rules[rule].guard;
            let mut s = self.grammar.next(guard);
            while s != guard {
                if let SymbolValue::NonTerminal(r) = self.grammar.value(s) {
                    number_of.entry(r).or_insert_with(|| {
                        order.push(r);
                        order.len() - 1
                    });
                }
                s = self.grammar.next(s);
            }
            i += 1;
        }

        order
            .iter()
            .map(|&rule| {
                let guard = self.grammar.rules[rule].guard;
                let mut body = Vec::new();
                let mut s = self.grammar.next(guard);
                while s != guard {
                    body.push(match self.grammar.value(s) {
                        SymbolValue::Terminal(t) => GrammarSymbol::Terminal(t),
                        SymbolValue::NonTerminal(r) => GrammarSymbol::Rule(number_of[&r]),
                        SymbolValue::Guard(_) => unreachable!(),
                    });
                    s = self.grammar.next(s);
                }
                body
            })
            .collect()
    }

    /// Populates every rule's `usage` field with its number of occurrences
    /// in the fully expanded input. Meaningful once the input is complete.
    pub fn finalize_usage(&mut self) {
        for (_, rule) in self.grammar.rules.iter_mut() {
            rule.usage = 0;
        }
        // Each reference visit counts once and queues the rule body for
        // another pass, so the totals come out in expanded-input terms.
        let mut stack = vec![self.start];
        while let Some(r) = stack.pop() {
            let guard = self.grammar.rules[r].guard;
            let mut s = self.grammar.next(guard);
            while s != guard {
                if let Some(inner) = self.grammar.value(s).rule() {
                    self.grammar.rules[inner].usage += 1;
                    stack.push(inner);
                }
                s = self.grammar.next(s);
            }
        }
    }

    /// Compression statistics for the current grammar.
    pub fn stats(&self) -> CompressionStats {
        let mut grammar_symbols = 0;
        for (_, rule) in &self.grammar.rules {
            let guard = rule.guard;
            let mut s = self.grammar.next(guard);
            while s != guard {
                grammar_symbols += 1;
                s = self.grammar.next(s);
            }
        }
        CompressionStats {
            input_length: self.length,
            grammar_symbols,
            num_rules: self.grammar.rule_count(),
            table_occupancy: self.grammar.digrams.occupancy(),
            table_lookups: self.grammar.digrams.lookups,
            table_collisions: self.grammar.digrams.collisions,
        }
    }
}

/// Statistics about the induced grammar and its digram table.
#[derive(Debug, Clone, Copy)]
pub struct CompressionStats {
    /// Number of input symbols appended.
    pub input_length: usize,
    /// Total symbols across all rule bodies.
    pub grammar_symbols: usize,
    /// Number of rules, the start rule included.
    pub num_rules: usize,
    /// Live fraction of the digram table.
    pub table_occupancy: f64,
    /// Digram table probe statistics.
    pub table_lookups: u64,
    pub table_collisions: u64,
}

impl CompressionStats {
    /// Grammar symbols as a percentage of the input length.
    pub fn compression_ratio(&self) -> f64 {
        if self.input_length == 0 {
            0.0
        } else {
            (self.grammar_symbols as f64 / self.input_length as f64) * 100.0
        }
    }
}
