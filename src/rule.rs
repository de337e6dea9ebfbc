//! Rules and the structural edits that rewrite them.

use crate::grammar::Grammar;
use crate::symbol::{RuleKey, SymbolKey};

/// One production of the grammar. The rule owns its guard symbol, and the
/// guard owns the ring through its links.
#[derive(Debug)]
pub(crate) struct Rule {
    /// Sentinel closing the ring of body symbols.
    pub guard: SymbolKey,

    /// Number of live non-terminal symbols referring to this rule.
    pub use_count: u32,

    /// Occurrences in the fully expanded input; populated at finalization.
    pub usage: u64,

    /// 0 until the rule body has been emitted to the coder, then the
    /// non-terminal code assigned to it.
    pub index: usize,
}

impl Rule {
    pub(crate) fn new() -> Self {
        Self {
            guard: SymbolKey::default(),
            use_count: 0,
            usage: 0,
            index: 0,
        }
    }
}

impl Grammar {
    /// Replaces the digram `(s, s.next)` with a reference to `r`.
    ///
    /// A substitution creates at most two new digrams, at the new symbol
    /// and after it; the first check covers the former and, when it leaves
    /// the grammar unchanged, the second check covers the latter.
    pub(crate) fn substitute(&mut self, s: SymbolKey, r: RuleKey) {
        let q = self.prev(s);

        let first = self.next(q);
        self.destroy_symbol(first);
        let second = self.next(q);
        self.destroy_symbol(second);

        let y = self.new_non_terminal(r);
        self.insert_after(q, y);

        if !self.check(q) {
            let after = self.next(q);
            self.check(after);
        }
    }

    /// Splices the referenced rule's body into the position of `s` and
    /// deletes both `s` and the rule.
    ///
    /// Called only on a non-terminal whose rule has use count 1 (the rule
    /// utility invariant); `s` is always the first body symbol of its host
    /// rule, so its predecessor is the host's guard.
    pub(crate) fn expand(&mut self, s: SymbolKey) {
        let left = self.prev(s);
        let right = self.next(s);
        let r = self
            .value(s)
            .rule()
            .expect("expand requires a non-terminal");
        debug_assert_eq!(self.rules[r].use_count, 1);

        let guard = self.rules[r].guard;
        let body_first = self.next(guard);
        let body_last = self.prev(guard);

        if self.track_rule_len {
            // Length the host rule will have: its current symbols without
            // `s`, plus the spliced-in body.
            let mut len = 0;
            let mut cur = right;
            while cur != s {
                if !self.is_guard(cur) {
                    len += 1;
                }
                cur = self.next(cur);
            }
            let mut cur = body_first;
            while cur != guard {
                len += 1;
                cur = self.next(cur);
            }
            if len > self.max_rule_len {
                self.max_rule_len = len;
            }
        }

        // Un-index the digram at `s` while its link is still intact.
        self.delete_digram(s);

        // Dissolve the rule: close the body ring, discard guard and rule.
        self.join(body_last, body_first);
        self.symbols.remove(guard);
        self.rules.remove(r);

        // Splice `s` out without touching the dead rule's count.
        self.join(left, right);
        self.symbols.remove(s);

        // Splice the body into the host.
        self.join(left, body_first);
        self.join(body_last, right);

        // The trailing boundary digram is new; re-record it.
        self.record_digram(body_last);
    }

    /// Deletes a rule's body symbols (releasing their references), then
    /// the guard and the rule itself.
    pub(crate) fn destroy_rule(&mut self, r: RuleKey) {
        let guard = self.rules[r].guard;
        loop {
            let f = self.first(r);
            if f == guard {
                break;
            }
            self.destroy_symbol(f);
        }
        self.symbols.remove(guard);
        self.rules.remove(r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::symbol::SymbolValue;

    fn push(g: &mut Grammar, r: RuleKey, v: u32) {
        let last = g.last(r);
        let y = g.new_terminal(v);
        g.insert_after(last, y);
        let prev = g.prev(y);
        g.check(prev);
    }

    #[test]
    fn test_substitute_reduces_and_counts() {
        let mut g = Grammar::new(&CodecConfig::default());
        let s = g.new_rule();
        for v in [1, 2, 3, 1, 2] {
            push(&mut g, s, v);
        }
        // (1,2) occurred twice: a rule exists with use count 2 and the
        // start rule is A 3 A.
        assert_eq!(g.rule_count(), 2);
        assert_eq!(g.rule_len(s), 3);
        let inner = g
            .rules
            .iter()
            .find(|(k, _)| *k != s)
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(g.rules[inner].use_count, 2);
    }

    #[test]
    fn test_expand_dissolves_single_use_rule() {
        // abcdbcabcd: forming "abcd" around an existing "bc" rule drives
        // the bc reference count through 1 and back up; at quiescence no
        // rule is singly used.
        let mut g = Grammar::new(&CodecConfig::default());
        let s = g.new_rule();
        for v in "abcdbcabcd".bytes() {
            push(&mut g, s, v as u32);
        }
        for (k, rule) in &g.rules {
            if k != s {
                assert!(rule.use_count >= 2);
            }
        }
        g.assert_links_consistent();
    }

    #[test]
    fn test_destroy_rule_releases_references() {
        let mut g = Grammar::new(&CodecConfig::default());
        let s = g.new_rule();
        for v in [1, 2, 1, 2, 9, 1, 2] {
            push(&mut g, s, v);
        }
        let inner = g
            .rules
            .iter()
            .find(|(k, _)| *k != s)
            .map(|(k, _)| k)
            .unwrap();
        let uses_before = g.rules[inner].use_count;
        assert_eq!(uses_before, 3);

        // Tear down the start rule; every reference it held is released.
        g.destroy_rule(s);
        assert_eq!(g.rules[inner].use_count, 0);
        // The inner rule's own body symbols survive until it is destroyed.
        assert_eq!(
            g.rule_len(inner),
            2,
            "inner body should still be 1 2"
        );
        g.destroy_rule(inner);
        assert_eq!(g.symbol_count(), 0);
        assert_eq!(g.rule_count(), 0);
    }

    #[test]
    fn test_expanded_values_survive() {
        let mut g = Grammar::new(&CodecConfig::default());
        let s = g.new_rule();
        let input: Vec<u32> = "xyxyzxyxz".bytes().map(u32::from).collect();
        for &v in &input {
            push(&mut g, s, v);
        }
        // Fully expand the start rule and compare with the input.
        fn expand_into(g: &Grammar, r: RuleKey, out: &mut Vec<u32>) {
            let guard = g.rules[r].guard;
            let mut cur = g.next(guard);
            while cur != guard {
                match g.value(cur) {
                    SymbolValue::Terminal(t) => out.push(t),
                    SymbolValue::NonTerminal(inner) => expand_into(g, inner, out),
                    SymbolValue::Guard(_) => unreachable!(),
                }
                cur = g.next(cur);
            }
        }
        let mut out = Vec::new();
        expand_into(&g, s, &mut out);
        assert_eq!(out, input);
    }
}
