//! In-memory n-gram counting block.
//!
//! An open-addressed hash table maps n-gram keys to slots in a packed record
//! arena. The table holds arena ids only; keys and counts live out-of-band in
//! the arena, so probing touches one cache-resident id array. A block is
//! populated by insertions, sorted exactly once, iterated exactly once by the
//! run writer, then released.
//!
//! The block never hashes keys itself: callers supply a 64-bit probe hint,
//! which keeps the table independent of key semantics.

pub mod radix;

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::order::SortOrder;
use crate::record::{BlockStats, NgramArena, Record, WordId};

/// Ratio of probe-table slots to arena capacity. At least 1.5, so a full
/// arena leaves a third of the table empty and linear probing terminates.
pub const PROBING_SPACE_MULTIPLIER: f64 = 1.5;

/// Empty probe-table slot. No record ever has this id.
const EMPTY_SLOT: u64 = u64::MAX;

/// Selects the in-memory sort path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortStrategy {
    /// Parallel LSD radix sort; reorders the arena in place and invalidates
    /// the probe table.
    Radix,
    /// Parallel comparison sort over an index permutation; the arena itself
    /// is untouched.
    Comparison,
}

/// Open-addressed counting block over a packed record arena.
pub struct CountingBlock {
    table: Vec<u64>,
    arena: NgramArena,
    stats: BlockStats,
    index: Option<Vec<u32>>,
    target: usize,
}

impl CountingBlock {
    /// Allocates a block for up to `target_size` distinct n-grams of the
    /// given order.
    pub fn new(order: usize, target_size: usize) -> Self {
        let buckets = ((target_size as f64) * PROBING_SPACE_MULTIPLIER).ceil() as usize;
        Self {
            table: vec![EMPTY_SLOT; buckets.max(2)],
            arena: NgramArena::new(order, target_size),
            stats: BlockStats::default(),
            index: None,
            target: target_size,
        }
    }

    pub fn order(&self) -> usize {
        self.arena.order()
    }

    /// Number of distinct n-grams inserted.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// True once the block holds its target number of distinct records; the
    /// caller must seal before inserting further.
    pub fn is_full(&self) -> bool {
        self.arena.len() >= self.target
    }

    pub fn buckets(&self) -> usize {
        self.table.len()
    }

    pub fn load_factor(&self) -> f64 {
        self.arena.len() as f64 / self.table.len() as f64
    }

    pub fn stats(&self) -> BlockStats {
        self.stats
    }

    /// Looks up `key`, inserting it with count 1 if absent. Returns whether
    /// the key already existed and its arena id. On a hit the count is not
    /// touched; the caller increments through [`count_mut`](Self::count_mut).
    ///
    /// Probing starts at `hint % buckets` and walks forward with wraparound.
    /// Returning to the start means the probing space is exhausted, which the
    /// driver's sizing must prevent; it surfaces as an internal error.
    pub fn find_or_insert(&mut self, key: &[WordId], hint: u64) -> Result<(bool, usize)> {
        debug_assert_eq!(key.len(), self.arena.order());
        let start = (hint % self.table.len() as u64) as usize;
        let mut slot = start;

        loop {
            match self.table[slot] {
                EMPTY_SLOT => {
                    let id = self.arena.push(key, 1);
                    self.table[slot] = id as u64;
                    for &word in key {
                        self.stats.observe_word(word);
                    }
                    return Ok((false, id));
                }
                occupied => {
                    let id = occupied as usize;
                    if self.arena.key(id) == key {
                        return Ok((true, id));
                    }
                }
            }
            slot += 1;
            if slot == self.table.len() {
                slot = 0;
            }
            if slot == start {
                return Err(Error::Internal(format!(
                    "probing space exhausted after {} slots; counting block undersized",
                    self.table.len()
                )));
            }
        }
    }

    pub fn count_mut(&mut self, id: usize) -> &mut u64 {
        self.arena.count_mut(id)
    }

    pub fn record(&self, id: usize) -> Record<'_> {
        self.arena.record(id)
    }

    /// Sorts the block by `order`. Called exactly once, after the last
    /// insertion. Also finalizes the count statistics, which insertions do
    /// not track (counts change through `count_mut` after insert).
    ///
    /// The radix path reorders the arena and drops the probe table, which
    /// ids no longer match. The comparison path leaves the arena untouched
    /// and records the permutation consulted by [`iter`](Self::iter).
    pub fn sort(&mut self, order: &dyn SortOrder, strategy: SortStrategy) {
        for &count in self.arena.counts() {
            self.stats.observe_count(count);
        }

        match strategy {
            SortStrategy::Radix => {
                radix::sort(&mut self.arena, order, self.stats.max_word_id);
                self.release_table();
                self.index = None;
                debug_assert!(self.is_sorted(order));
            }
            SortStrategy::Comparison => {
                let mut index: Vec<u32> = (0..self.arena.len() as u32).collect();
                let arena = &self.arena;
                index.par_sort_unstable_by(|&a, &b| {
                    order.compare(arena.key(a as usize), arena.key(b as usize))
                });
                self.index = Some(index);
            }
        }
    }

    /// Yields records in sorted order; valid only after [`sort`](Self::sort).
    pub fn iter(&self) -> SortedIter<'_> {
        SortedIter { block: self, pos: 0 }
    }

    /// Drops the probe table, retaining the arena and any permutation.
    pub fn release_table(&mut self) {
        self.table = Vec::new();
    }

    fn is_sorted(&self, order: &dyn SortOrder) -> bool {
        let mut iter = self.iter();
        let Some(first) = iter.next() else {
            return true;
        };
        let mut prev = first;
        for record in iter {
            if order.compare(prev.words, record.words) != Ordering::Less {
                return false;
            }
            prev = record;
        }
        true
    }
}

/// Forward iterator over a sorted block's records.
pub struct SortedIter<'a> {
    block: &'a CountingBlock,
    pos: usize,
}

impl<'a> Iterator for SortedIter<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos == self.block.arena.len() {
            return None;
        }
        let id = match &self.block.index {
            Some(index) => index[self.pos] as usize,
            None => self.pos,
        };
        self.pos += 1;
        Some(self.block.arena.record(id))
    }
}
