//! Sort orders over n-gram records, expressed as position schedules.
//!
//! The key layout never changes: words sit at storage positions 0..N-1. An
//! order decides the sequence in which positions are visited when comparing
//! two records, so the same arena can be sorted suffix-first without ever
//! permuting keys at insert time. Rank 0 is the most significant position.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::record::WordId;

/// A total order over records of a fixed model order N, defined by a
/// traversal schedule over the N storage positions.
pub trait SortOrder: Send + Sync {
    /// Model order N.
    fn order(&self) -> usize;

    /// Storage position visited at schedule rank `rank`, with rank 0 the
    /// most significant.
    fn position(&self, rank: usize) -> usize;

    /// Compares two keys by visiting positions in schedule order.
    fn compare(&self, a: &[WordId], b: &[WordId]) -> Ordering {
        for rank in 0..self.order() {
            let pos = self.position(rank);
            match a[pos].cmp(&b[pos]) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Longest common prefix of two keys in the schedule, in 0..=N.
    fn lcp(&self, a: &[WordId], b: &[WordId]) -> usize {
        for rank in 0..self.order() {
            let pos = self.position(rank);
            if a[pos] != b[pos] {
                return rank;
            }
        }
        self.order()
    }

    /// The full schedule as storage positions.
    fn schedule(&self) -> Vec<usize> {
        (0..self.order()).map(|rank| self.position(rank)).collect()
    }
}

/// Lexicographic order on the key as written: positions 0, 1, ..., N-1.
#[derive(Clone, Copy, Debug)]
pub struct PrefixOrder {
    order: usize,
}

impl PrefixOrder {
    pub fn new(order: usize) -> Self {
        Self { order }
    }
}

impl SortOrder for PrefixOrder {
    fn order(&self) -> usize {
        self.order
    }

    fn position(&self, rank: usize) -> usize {
        rank
    }
}

/// Last word first, then the context prefix: positions N-1, 0, 1, ..., N-2.
///
/// Clusters all n-grams sharing a suffix context.
#[derive(Clone, Copy, Debug)]
pub struct ContextOrder {
    order: usize,
}

impl ContextOrder {
    pub fn new(order: usize) -> Self {
        Self { order }
    }
}

impl SortOrder for ContextOrder {
    fn order(&self) -> usize {
        self.order
    }

    fn position(&self, rank: usize) -> usize {
        if rank == 0 {
            self.order - 1
        } else {
            rank - 1
        }
    }
}

/// Selects one of the concrete orders; carried in configuration and run
/// manifests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Prefix,
    Context,
}

impl OrderKind {
    pub fn build(self, order: usize) -> Box<dyn SortOrder> {
        match self {
            OrderKind::Prefix => Box::new(PrefixOrder::new(order)),
            OrderKind::Context => Box::new(ContextOrder::new(order)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_schedule() {
        let order = PrefixOrder::new(4);
        assert_eq!(order.schedule(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_context_schedule_visits_last_position_first() {
        let order = ContextOrder::new(3);
        assert_eq!(order.schedule(), vec![2, 0, 1]);
        let order5 = ContextOrder::new(5);
        assert_eq!(order5.schedule(), vec![4, 0, 1, 2, 3]);
    }

    #[test]
    fn test_prefix_compare() {
        let order = PrefixOrder::new(3);
        assert_eq!(order.compare(&[1, 2, 3], &[1, 2, 4]), Ordering::Less);
        assert_eq!(order.compare(&[1, 3, 0], &[1, 2, 9]), Ordering::Greater);
        assert_eq!(order.compare(&[5, 5, 5], &[5, 5, 5]), Ordering::Equal);
    }

    #[test]
    fn test_context_compare_clusters_by_last_word() {
        let order = ContextOrder::new(3);
        // Last words 3 vs 4 decide before any context position.
        assert_eq!(order.compare(&[9, 9, 3], &[1, 1, 4]), Ordering::Less);
        // Equal last word: fall back to positions 0 then 1.
        assert_eq!(order.compare(&[1, 2, 3], &[1, 3, 3]), Ordering::Less);
        assert_eq!(order.compare(&[2, 0, 3], &[1, 9, 3]), Ordering::Greater);
    }

    #[test]
    fn test_context_sorted_sequence() {
        let order = ContextOrder::new(3);
        let mut keys = vec![[1u32, 2, 3], [1, 2, 4], [1, 3, 3]];
        keys.sort_by(|a, b| order.compare(a, b));
        assert_eq!(keys, vec![[1, 2, 3], [1, 3, 3], [1, 2, 4]]);
    }

    #[test]
    fn test_lcp_under_schedule() {
        let order = ContextOrder::new(3);
        // Schedule [2, 0, 1]: both share position 2 and position 0.
        assert_eq!(order.lcp(&[1, 2, 3], &[1, 4, 3]), 2);
        // Different last word: nothing shared.
        assert_eq!(order.lcp(&[1, 2, 3], &[1, 2, 4]), 0);
        assert_eq!(order.lcp(&[1, 2, 3], &[1, 2, 3]), 3);

        let prefix = PrefixOrder::new(3);
        assert_eq!(prefix.lcp(&[1, 2, 3], &[1, 2, 4]), 2);
        assert_eq!(prefix.lcp(&[5, 5, 5], &[6, 6, 6]), 0);
    }
}
