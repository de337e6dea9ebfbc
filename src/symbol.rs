//! Symbol arena types.
//!
//! Symbols are nodes of doubly-linked rings stored in a SlotMap arena;
//! neighbor links are generational keys instead of raw pointers, which
//! makes stale digram-index entries detectable instead of dangerous.

use slotmap::new_key_type;

new_key_type! {
    pub(crate) struct SymbolKey;
    pub(crate) struct RuleKey;
}

/// The tagged value a symbol carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SymbolValue {
    /// A value from the input alphabet.
    Terminal(u32),

    /// A reference to a rule; contributes to that rule's use count.
    NonTerminal(RuleKey),

    /// The sentinel closing a rule's ring. Its predecessor is the rule's
    /// last real symbol and its successor the first; the back-reference
    /// identifies the owning rule.
    Guard(RuleKey),
}

impl SymbolValue {
    /// Key value for the digram index. Terminals are odd, rule references
    /// even, preserving the tag in the low bit.
    #[inline]
    pub(crate) fn raw(&self) -> u64 {
        match *self {
            SymbolValue::Terminal(t) => ((t as u64) << 1) | 1,
            SymbolValue::NonTerminal(r) | SymbolValue::Guard(r) => {
                slotmap::Key::data(&r).as_ffi() << 1
            }
        }
    }

    #[inline]
    pub(crate) fn is_guard(&self) -> bool {
        matches!(self, SymbolValue::Guard(_))
    }

    #[inline]
    pub(crate) fn terminal(&self) -> Option<u32> {
        match *self {
            SymbolValue::Terminal(t) => Some(t),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn rule(&self) -> Option<RuleKey> {
        match *self {
            SymbolValue::NonTerminal(r) => Some(r),
            _ => None,
        }
    }
}

/// A node in the doubly-linked ring belonging to exactly one rule.
///
/// The links are `None` only between creation and first linking; every
/// symbol reachable from a rule satisfies `prev.next == self == next.prev`.
#[derive(Debug)]
pub(crate) struct SymbolNode {
    pub value: SymbolValue,
    pub prev: Option<SymbolKey>,
    pub next: Option<SymbolKey>,
}

impl SymbolNode {
    pub(crate) fn new(value: SymbolValue) -> Self {
        Self {
            value,
            prev: None,
            next: None,
        }
    }
}
