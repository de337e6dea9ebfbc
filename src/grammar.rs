//! Grammar storage and the Sequitur constraint engine.
//!
//! [`Grammar`] owns the symbol and rule arenas plus the digram index and
//! enforces the two Sequitur invariants on every append and structural
//! edit: no digram occurs more than once (subject to the overlapping-triple
//! recording rule), and every rule other than the start rule is referenced
//! at least `min_occurrences` times.

use slotmap::SlotMap;

use crate::config::CodecConfig;
use crate::digram::{Cell, DigramIndex};
use crate::rule::Rule;
use crate::symbol::{RuleKey, SymbolKey, SymbolNode, SymbolValue};

pub(crate) struct Grammar {
    pub(crate) symbols: SlotMap<SymbolKey, SymbolNode>,
    pub(crate) rules: SlotMap<RuleKey, Rule>,
    pub(crate) digrams: DigramIndex,
    delimiter: Option<u32>,
    /// Longest rule length seen, maintained while `track_rule_len` holds.
    pub(crate) max_rule_len: usize,
    pub(crate) track_rule_len: bool,
}

impl Grammar {
    pub(crate) fn new(cfg: &CodecConfig) -> Self {
        Self {
            symbols: SlotMap::with_key(),
            rules: SlotMap::with_key(),
            digrams: DigramIndex::new(cfg.hash_memory, cfg.k_width()),
            delimiter: cfg.delimiter,
            max_rule_len: 2,
            track_rule_len: true,
        }
    }

    // ========================================================================
    // Arena accessors
    // ========================================================================

    #[inline]
    pub(crate) fn value(&self, s: SymbolKey) -> SymbolValue {
        self.symbols[s].value
    }

    #[inline]
    pub(crate) fn next(&self, s: SymbolKey) -> SymbolKey {
        self.symbols[s].next.expect("symbol not linked into a ring")
    }

    #[inline]
    pub(crate) fn prev(&self, s: SymbolKey) -> SymbolKey {
        self.symbols[s].prev.expect("symbol not linked into a ring")
    }

    #[inline]
    pub(crate) fn is_guard(&self, s: SymbolKey) -> bool {
        self.symbols[s].value.is_guard()
    }

    /// First symbol of a rule's right hand (the guard itself if empty).
    #[inline]
    pub(crate) fn first(&self, r: RuleKey) -> SymbolKey {
        self.next(self.rules[r].guard)
    }

    /// Last symbol of a rule's right hand.
    #[inline]
    pub(crate) fn last(&self, r: RuleKey) -> SymbolKey {
        self.prev(self.rules[r].guard)
    }

    pub(crate) fn new_terminal(&mut self, value: u32) -> SymbolKey {
        self.symbols
            .insert(SymbolNode::new(SymbolValue::Terminal(value)))
    }

    /// Creates a reference symbol and counts it against the rule.
    pub(crate) fn new_non_terminal(&mut self, r: RuleKey) -> SymbolKey {
        self.rules[r].use_count += 1;
        self.symbols
            .insert(SymbolNode::new(SymbolValue::NonTerminal(r)))
    }

    /// Allocates a rule with an empty ring: a guard linked to itself.
    pub(crate) fn new_rule(&mut self) -> RuleKey {
        let r = self.rules.insert(Rule::new());
        let guard = self
            .symbols
            .insert(SymbolNode::new(SymbolValue::Guard(r)));
        self.symbols[guard].next = Some(guard);
        self.symbols[guard].prev = Some(guard);
        self.rules[r].guard = guard;
        r
    }

    /// Length of a rule's right hand.
    pub(crate) fn rule_len(&self, r: RuleKey) -> usize {
        let guard = self.rules[r].guard;
        let mut n = 0;
        let mut s = self.next(guard);
        while s != guard {
            n += 1;
            s = self.next(s);
        }
        n
    }

    // ========================================================================
    // Digram index operations
    // ========================================================================

    /// Locates the index group for the digram starting at `s`, or `None`
    /// when either side is the delimiter so no rule forms across it.
    pub(crate) fn find_digram(&mut self, s: SymbolKey) -> Option<usize> {
        let n = self.next(s);
        if let Some(d) = self.delimiter {
            if self.value(s).terminal() == Some(d) || self.value(n).terminal() == Some(d) {
                return None;
            }
        }
        let one = self.value(s).raw();
        let two = self.value(n).raw();
        Some(self.digrams.locate(&self.symbols, one, two))
    }

    /// Removes the digram starting at `s` from the index, if recorded.
    pub(crate) fn delete_digram(&mut self, s: SymbolKey) {
        if self.is_guard(s) {
            return;
        }
        let Some(n) = self.symbols[s].next else {
            return;
        };
        if self.is_guard(n) {
            return;
        }
        if let Some(base) = self.find_digram(s) {
            for i in 0..self.digrams.k_width() {
                if self.digrams.cell(base + i) == Cell::Live(s) {
                    self.digrams.set_tombstone(base + i);
                }
            }
        }
    }

    /// Re-records a digram recovered by a structural edit.
    ///
    /// Stores into the first free cell of the located group; if a live cell
    /// already records this digram the existing entry is kept, so recovery
    /// never overwrites an occurrence that is still indexed.
    pub(crate) fn record_digram(&mut self, s: SymbolKey) {
        let Some(base) = self.find_digram(s) else {
            return;
        };
        let width = self.digrams.k_width();
        for i in 0..width {
            match self.digrams.cell(base + i) {
                Cell::Live(m) if m == s => return,
                Cell::Live(_) => {}
                Cell::Empty | Cell::Tombstone => {
                    self.digrams.set_live(base + i, s);
                    return;
                }
            }
        }
        // All cells hold other occurrences of the same key; the digram is
        // recorded, nothing to do.
        debug_assert!(matches!(self.digrams.cell(base), Cell::Live(_)));
    }

    // ========================================================================
    // Ring surgery
    // ========================================================================

    /// Links two symbols, un-indexing the digram `left` used to start.
    ///
    /// When the removed digram was the recorded second pair of an
    /// overlapping triple `x x x`, the first pair is re-recorded so it is
    /// not forgotten; both sides of the splice get this patch.
    pub(crate) fn join(&mut self, left: SymbolKey, right: SymbolKey) {
        if self.symbols[left].next.is_some() {
            self.delete_digram(left);

            let rn = self.symbols[right].next;
            let rp = self.symbols[right].prev;
            if let (Some(rp), Some(_)) = (rp, rn) {
                let v = self.value(right).raw();
                if v == self.value(rp).raw() && v == self.value(self.next(right)).raw() {
                    self.record_digram(right);
                }
            }

            let lp = self.symbols[left].prev;
            let ln = self.symbols[left].next;
            if let (Some(lp), Some(ln)) = (lp, ln) {
                let v = self.value(left).raw();
                if v == self.value(ln).raw() && v == self.value(lp).raw() {
                    self.record_digram(lp);
                }
            }
        }
        self.symbols[left].next = Some(right);
        self.symbols[right].prev = Some(left);
    }

    /// Inserts `y` between `s` and its successor.
    pub(crate) fn insert_after(&mut self, s: SymbolKey, y: SymbolKey) {
        let n = self.next(s);
        self.join(y, n);
        self.join(s, y);
    }

    /// Splices a symbol out of its ring, un-indexes its digram, releases
    /// its rule reference, and frees the arena slot.
    pub(crate) fn destroy_symbol(&mut self, s: SymbolKey) {
        debug_assert!(!self.is_guard(s), "guards die with their rule");
        let p = self.prev(s);
        let n = self.next(s);
        self.join(p, n);
        self.delete_digram(s);
        if let Some(r) = self.value(s).rule() {
            self.rules[r].use_count -= 1;
        }
        self.symbols.remove(s);
    }

    // ========================================================================
    // Constraint engine
    // ========================================================================

    /// Checks the digram made of `s` and its successor and enforces the
    /// Sequitur constraints. Returns whether the grammar changed.
    pub(crate) fn check(&mut self, s: SymbolKey) -> bool {
        if self.is_guard(s) || self.is_guard(self.next(s)) {
            return false;
        }

        let Some(base) = self.find_digram(s) else {
            return false;
        };
        let width = self.digrams.k_width();

        // Not all occurrences gathered yet: record this one and wait.
        for i in 0..width {
            match self.digrams.cell(base + i) {
                Cell::Empty | Cell::Tombstone => {
                    self.digrams.set_live(base + i, s);
                    return false;
                }
                Cell::Live(_) => {}
            }
        }

        let stored: Vec<SymbolKey> = (0..width)
            .map(|i| match self.digrams.cell(base + i) {
                Cell::Live(m) => m,
                _ => unreachable!(),
            })
            .collect();

        // Overlapping repetitions are never substituted.
        for &o in &stored {
            if self.next(o) == s || self.next(s) == o {
                return false;
            }
        }

        // A stored occurrence that is exactly a rule's body: reuse the rule.
        for &o in &stored {
            if self.is_guard(self.prev(o)) && self.is_guard(self.next(self.next(o))) {
                let r = match self.value(self.prev(o)) {
                    SymbolValue::Guard(r) => r,
                    _ => unreachable!(),
                };
                self.substitute(s, r);
                self.expand_if_underused(r);
                return true;
            }
        }

        // Otherwise make a rule out of copies of the digram, then replace
        // every gathered occurrence with a reference to it.
        let first_value = self.value(s);
        let second_value = self.value(self.next(s));
        let r = self.new_rule();
        let copy_first = self.copy_symbol(first_value);
        let last = self.last(r);
        self.insert_after(last, copy_first);
        let copy_second = self.copy_symbol(second_value);
        let last = self.last(r);
        self.insert_after(last, copy_second);

        for &o in &stored {
            if o == self.first(r) {
                continue;
            }
            // Substituting an earlier occurrence may have destroyed or
            // un-indexed this one under our feet.
            if !self.symbols.contains_key(o) {
                continue;
            }
            let still_stored = (0..width)
                .any(|i| self.digrams.cell(base + i) == Cell::Live(o));
            if !still_stored {
                continue;
            }
            self.substitute(o, r);
        }

        let rule_first = self.first(r);
        self.digrams.set_live(base, rule_first);

        // A substitution cascade above can in principle consume `s` itself.
        if self.symbols.contains_key(s) {
            self.substitute(s, r);
        }
        self.expand_if_underused(r);
        true
    }

    fn copy_symbol(&mut self, value: SymbolValue) -> SymbolKey {
        match value {
            SymbolValue::Terminal(t) => self.new_terminal(t),
            SymbolValue::NonTerminal(r) => self.new_non_terminal(r),
            SymbolValue::Guard(_) => unreachable!("guards are never part of a digram"),
        }
    }

    /// Expands the first symbol of `r` when it references a rule that has
    /// fallen to a single use.
    pub(crate) fn expand_if_underused(&mut self, r: RuleKey) {
        let f = self.first(r);
        if let Some(inner) = self.value(f).rule() {
            if self.rules[inner].use_count == 1 {
                self.expand(f);
            }
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub(crate) fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub(crate) fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Whether the digram starting at `s` has any occurrence with the
    /// same key recorded in the index (`None` when it crosses the
    /// delimiter).
    #[cfg(test)]
    pub(crate) fn digram_key_recorded(&mut self, s: SymbolKey) -> Option<bool> {
        let one = self.value(s).raw();
        let two = self.value(self.next(s)).raw();
        let base = self.find_digram(s)?;
        for i in 0..self.digrams.k_width() {
            if let Cell::Live(m) = self.digrams.cell(base + i) {
                let m_two = self
                    .symbols
                    .get(self.next(m))
                    .map(|n| n.value.raw());
                if self.value(m).raw() == one && m_two == Some(two) {
                    return Some(true);
                }
            }
        }
        Some(false)
    }

    /// Whether this exact occurrence is the one recorded in the index.
    #[cfg(test)]
    pub(crate) fn digram_recorded_at(&mut self, s: SymbolKey) -> bool {
        let Some(base) = self.find_digram(s) else {
            return false;
        };
        (0..self.digrams.k_width()).any(|i| self.digrams.cell(base + i) == Cell::Live(s))
    }

    #[cfg(test)]
    pub(crate) fn assert_links_consistent(&self) {
        for (key, node) in &self.symbols {
            if let Some(n) = node.next {
                assert_eq!(self.symbols[n].prev, Some(key), "broken ring at {:?}", key);
            }
            if let Some(p) = node.prev {
                assert_eq!(self.symbols[p].next, Some(key), "broken ring at {:?}", key);
            }
        }
    }

    /// Every live index entry must point at a live, linked, non-guard
    /// digram; structural edits are required to remove entries before the
    /// pointed-to symbols die.
    #[cfg(test)]
    pub(crate) fn assert_index_valid(&self) {
        for i in 0..self.digrams.cell_count() {
            if let Cell::Live(m) = self.digrams.cell(i) {
                let node = self.symbols.get(m).expect("index entry outlived its symbol");
                assert!(!node.value.is_guard());
                let n = node.next.expect("indexed digram lost its link");
                let n_node = self
                    .symbols
                    .get(n)
                    .expect("indexed digram lost its second half");
                assert!(!n_node.value.is_guard());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> Grammar {
        Grammar::new(&CodecConfig::default())
    }

    /// Appends a value to a rule and runs the constraint check, the way
    /// the input loop does.
    fn push(g: &mut Grammar, r: RuleKey, v: u32) {
        let last = g.last(r);
        let y = g.new_terminal(v);
        g.insert_after(last, y);
        let prev = g.prev(y);
        g.check(prev);
    }

    fn body(g: &Grammar, r: RuleKey) -> Vec<SymbolValue> {
        let guard = g.rules[r].guard;
        let mut out = Vec::new();
        let mut s = g.next(guard);
        while s != guard {
            out.push(g.value(s));
            s = g.next(s);
        }
        out
    }

    #[test]
    fn test_empty_rule_ring() {
        let mut g = grammar();
        let r = g.new_rule();
        assert_eq!(g.first(r), g.rules[r].guard);
        assert_eq!(g.rule_len(r), 0);
    }

    #[test]
    fn test_append_links_ring() {
        let mut g = grammar();
        let r = g.new_rule();
        for v in [1, 2, 3] {
            push(&mut g, r, v);
        }
        assert_eq!(
            body(&g, r),
            vec![
                SymbolValue::Terminal(1),
                SymbolValue::Terminal(2),
                SymbolValue::Terminal(3)
            ]
        );
        g.assert_links_consistent();
    }

    #[test]
    fn test_repeated_digram_forms_rule() {
        let mut g = grammar();
        let s = g.new_rule();
        for v in [1, 2, 1, 2] {
            push(&mut g, s, v);
        }
        // One new rule holding the digram, start rule reduced to two
        // references.
        assert_eq!(g.rule_count(), 2);
        assert_eq!(g.rule_len(s), 2);
        let inner = g
            .rules
            .iter()
            .find(|(k, _)| *k != s)
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(g.rules[inner].use_count, 2);
        assert_eq!(
            body(&g, inner),
            vec![SymbolValue::Terminal(1), SymbolValue::Terminal(2)]
        );
        g.assert_links_consistent();
    }

    #[test]
    fn test_triple_overlap_not_substituted() {
        let mut g = grammar();
        let s = g.new_rule();
        for v in [7, 7, 7] {
            push(&mut g, s, v);
        }
        // The two (7,7) digrams overlap; no rule may form.
        assert_eq!(g.rule_count(), 1);
        assert_eq!(g.rule_len(s), 3);
    }

    #[test]
    fn test_fourth_repeat_uses_overlap_recovery() {
        let mut g = grammar();
        let s = g.new_rule();
        for v in [7, 7, 7, 7] {
            push(&mut g, s, v);
        }
        // aaaa reduces to S -> A A with A -> a a.
        assert_eq!(g.rule_count(), 2);
        assert_eq!(g.rule_len(s), 2);
        let inner = g
            .rules
            .iter()
            .find(|(k, _)| *k != s)
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(
            body(&g, inner),
            vec![SymbolValue::Terminal(7), SymbolValue::Terminal(7)]
        );
        g.assert_links_consistent();
    }

    #[test]
    fn test_rule_utility_via_expansion() {
        let mut g = grammar();
        let s = g.new_rule();
        // abcdbcabcdbc: nested structure exercises underused-rule expansion.
        for v in "abcdbcabcdbc".bytes() {
            push(&mut g, s, v as u32);
        }
        for (k, rule) in &g.rules {
            if k != s {
                assert!(rule.use_count >= 2, "rule used {} times", rule.use_count);
            }
        }
        g.assert_links_consistent();
    }

    #[test]
    fn test_delimiter_blocks_rule_formation() {
        let cfg = CodecConfig {
            delimiter: Some(b'\n' as u32),
            ..CodecConfig::default()
        };
        let mut g = Grammar::new(&cfg);
        let s = g.new_rule();
        for v in "foo\nfoo\n".bytes() {
            push(&mut g, s, v as u32);
        }
        // "foo" repeats, but both candidate digrams straddle or touch the
        // delimiter somewhere along the way; the rule that does form must
        // never contain the delimiter.
        for (k, _) in &g.rules {
            if k != s {
                assert!(
                    !body(&g, k)
                        .iter()
                        .any(|v| v.terminal() == Some(b'\n' as u32)),
                    "rule crosses the delimiter"
                );
            }
        }
    }

    #[test]
    fn test_max_rule_len_tracking_freezes() {
        let mut g = grammar();
        let s = g.new_rule();
        for v in "abcabcabcabc".bytes() {
            push(&mut g, s, v as u32);
        }
        let tracked = g.max_rule_len;
        assert!(tracked >= 2);
        g.track_rule_len = false;
        for v in "xyzxyzxyzxyz".bytes() {
            push(&mut g, s, v as u32);
        }
        assert_eq!(g.max_rule_len, tracked);
    }
}
