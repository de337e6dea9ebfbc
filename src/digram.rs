//! Fixed-size open-addressed index of live digrams.
//!
//! The table holds `table_size` groups of `k_width` cells; a group gathers
//! up to `k_width` stored occurrences of one digram before the constraint
//! engine forms a rule from them. Probing uses double hashing with the
//! group base cell as the key witness; tombstones are remembered as the
//! earliest insertion target but do not terminate the search.

use slotmap::SlotMap;

use crate::symbol::{SymbolKey, SymbolNode};

/// State of one table cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cell {
    Empty,
    Tombstone,
    Live(SymbolKey),
}

pub(crate) struct DigramIndex {
    cells: Vec<Cell>,
    table_size: usize,
    k_width: usize,
    pub(crate) occupied: usize,
    pub(crate) lookups: u64,
    pub(crate) collisions: u64,
}

/// Largest prime not exceeding `n` (with a small floor so degenerate
/// budgets still yield a usable table).
fn largest_prime_at_most(n: usize) -> usize {
    fn is_prime(n: usize) -> bool {
        if n < 2 {
            return false;
        }
        if n % 2 == 0 {
            return n == 2;
        }
        let mut d = 3;
        while d * d <= n {
            if n % d == 0 {
                return false;
            }
            d += 2;
        }
        true
    }

    let mut n = n.max(101);
    if n % 2 == 0 {
        n -= 1;
    }
    while !is_prime(n) {
        n -= 2;
    }
    n
}

impl DigramIndex {
    /// Sizes the table once from a byte budget: the largest prime number
    /// of groups that fits.
    pub(crate) fn new(memory_budget: usize, k_width: usize) -> Self {
        let table_size =
            largest_prime_at_most(memory_budget / (k_width * std::mem::size_of::<usize>()));
        log::debug!(
            "digram index: {} groups of {} cells ({} bytes requested)",
            table_size,
            k_width,
            memory_budget
        );
        Self {
            cells: vec![Cell::Empty; table_size * k_width],
            table_size,
            k_width,
            occupied: 0,
            lookups: 0,
            collisions: 0,
        }
    }

    pub(crate) fn k_width(&self) -> usize {
        self.k_width
    }

    /// Locates the group for the digram key `(one, two)`.
    ///
    /// Returns the base cell index of either the group holding a matching
    /// live digram or the first insertable group encountered (an earlier
    /// tombstoned group wins over a later empty one).
    pub(crate) fn locate(
        &mut self,
        symbols: &SlotMap<SymbolKey, SymbolNode>,
        one: u64,
        two: u64,
    ) -> usize {
        let jump = ((17 - (one % 17)) as usize) * self.k_width;
        let combined = ((one << 16) | (one >> 16)) ^ two;
        let mut i = ((combined.wrapping_mul(combined.wrapping_add(3))
            % self.table_size as u64) as usize)
            * self.k_width;
        let span = self.table_size * self.k_width;
        let mut insert = None;

        self.lookups += 1;
        loop {
            match self.cells[i] {
                Cell::Empty => {
                    return insert.unwrap_or(i);
                }
                Cell::Tombstone => {
                    if insert.is_none() {
                        insert = Some(i);
                    }
                }
                Cell::Live(m) => {
                    // Every structural edit removes its index entries
                    // before freeing symbols, so live cells are valid;
                    // generational keys let a violation fail soft.
                    match symbols.get(m) {
                        Some(node) => {
                            let m_two = node
                                .next
                                .and_then(|n| symbols.get(n))
                                .map(|n| n.value.raw())
                                .unwrap_or_default();
                            if node.value.raw() == one && m_two == two {
                                return i;
                            }
                        }
                        None => debug_assert!(false, "stale digram index entry"),
                    }
                }
            }
            i = (i + jump) % span;
            if insert.is_none() {
                self.collisions += 1;
            }
        }
    }

    #[inline]
    pub(crate) fn cell(&self, i: usize) -> Cell {
        self.cells[i]
    }

    #[inline]
    pub(crate) fn set_live(&mut self, i: usize, s: SymbolKey) {
        if !matches!(self.cells[i], Cell::Live(_)) {
            self.occupied += 1;
        }
        self.cells[i] = Cell::Live(s);
    }

    #[inline]
    pub(crate) fn set_tombstone(&mut self, i: usize) {
        if matches!(self.cells[i], Cell::Live(_)) {
            self.occupied -= 1;
        }
        self.cells[i] = Cell::Tombstone;
    }

    /// Fraction of live cells, for occupancy reporting.
    pub(crate) fn occupancy(&self) -> f64 {
        self.occupied as f64 / self.cells.len() as f64
    }

    #[cfg(test)]
    pub(crate) fn cell_count(&self) -> usize {
        self.cells.len()
    }
}
