//! Reconstruction of the original sequence by rule expansion.

use crate::grammar::Grammar;
use crate::symbol::{RuleKey, SymbolKey, SymbolValue};

/// Iterator yielding the terminals of a rule's full expansion.
///
/// Descends into rule references with an explicit parent stack, so deeply
/// nested grammars cannot overflow the call stack.
pub struct ExpansionIter<'a> {
    grammar: &'a Grammar,
    current: Option<SymbolKey>,
    stack: Vec<SymbolKey>,
}

impl<'a> ExpansionIter<'a> {
    pub(crate) fn new(grammar: &'a Grammar, rule: RuleKey) -> Self {
        let start = grammar.first(rule);
        let mut iter = Self {
            grammar,
            current: None,
            stack: Vec::new(),
        };
        iter.current = iter.resolve_forward(start);
        iter
    }

    /// Advances from `key` to the next terminal position, descending into
    /// rules and popping back out at guards.
    fn resolve_forward(&mut self, key: SymbolKey) -> Option<SymbolKey> {
        let mut key = key;
        loop {
            match self.grammar.value(key) {
                SymbolValue::Terminal(_) => return Some(key),

                SymbolValue::NonTerminal(rule) => {
                    self.stack.push(key);
                    key = self.grammar.first(rule);
                }

                SymbolValue::Guard(_) => {
                    // End of a rule body; resume after the reference that
                    // brought us here, or finish at the outermost guard.
                    let parent = self.stack.pop()?;
                    key = self.grammar.next(parent);
                }
            }
        }
    }
}

impl<'a> Iterator for ExpansionIter<'a> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        let value = match self.grammar.value(current) {
            SymbolValue::Terminal(t) => t,
            _ => unreachable!("resolve_forward stops only at terminals"),
        };
        let next = self.grammar.next(current);
        self.current = self.resolve_forward(next);
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;

    fn build(input: &[u32]) -> (Grammar, RuleKey) {
        let mut g = Grammar::new(&CodecConfig::default());
        let s = g.new_rule();
        for &v in input {
            let last = g.last(s);
            let y = g.new_terminal(v);
            g.insert_after(last, y);
            let prev = g.prev(y);
            g.check(prev);
        }
        (g, s)
    }

    #[test]
    fn test_empty_expansion() {
        let (g, s) = build(&[]);
        assert_eq!(ExpansionIter::new(&g, s).count(), 0);
    }

    #[test]
    fn test_single_symbol() {
        let (g, s) = build(&[42]);
        let out: Vec<u32> = ExpansionIter::new(&g, s).collect();
        assert_eq!(out, vec![42]);
    }

    #[test]
    fn test_flat_sequence() {
        let input = [1u32, 2, 3, 4];
        let (g, s) = build(&input);
        let out: Vec<u32> = ExpansionIter::new(&g, s).collect();
        assert_eq!(out, input);
    }

    #[test]
    fn test_nested_rules_expand() {
        let input: Vec<u32> = "abcabcabcabc".bytes().map(u32::from).collect();
        let (g, s) = build(&input);
        assert!(g.rule_count() > 2, "expected nested rules");
        let out: Vec<u32> = ExpansionIter::new(&g, s).collect();
        assert_eq!(out, input);
    }
}
