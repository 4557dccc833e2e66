use std::path::PathBuf;

use crate::counting::{SortStrategy, PROBING_SPACE_MULTIPLIER};
use crate::order::OrderKind;
use crate::record::record_stride;

/// Smallest per-block record target, regardless of the RAM budget.
const MIN_BLOCK_TARGET: usize = 1024;

/// Configuration for the counting pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Model order N. Must be > 2 and <= MAX_ORDER.
    pub order: usize,

    /// RAM budget in bytes across all workers (default: 1 GiB).
    pub ram_bytes: usize,

    /// Number of worker threads (default: 1).
    pub threads: usize,

    /// Directory for run files (default: ./gramrun)
    pub tmp_dir: PathBuf,

    /// In-memory sort strategy (default: radix).
    pub sort: SortStrategy,

    /// Record ordering for runs (default: context order).
    pub ordering: OrderKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order: 3,
            ram_bytes: 1024 * 1024 * 1024, // 1 GiB
            threads: 1,
            tmp_dir: PathBuf::from("./gramrun"),
            sort: SortStrategy::Radix,
            ordering: OrderKind::Context,
        }
    }
}

impl Config {
    /// Create a new config with the given model order.
    pub fn new(order: usize) -> Self {
        Self {
            order,
            ..Default::default()
        }
    }

    /// Set the RAM budget in bytes.
    pub fn ram_bytes(mut self, bytes: usize) -> Self {
        self.ram_bytes = bytes;
        self
    }

    /// Set the number of worker threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the run-file directory.
    pub fn tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = dir.into();
        self
    }

    /// Set the in-memory sort strategy.
    pub fn sort(mut self, sort: SortStrategy) -> Self {
        self.sort = sort;
        self
    }

    /// Set the record ordering.
    pub fn ordering(mut self, ordering: OrderKind) -> Self {
        self.ordering = ordering;
        self
    }

    /// Per-worker counting-block capacity in records, derived from the RAM
    /// budget: each record costs its packed stride plus its share of the
    /// probe table (one u64 slot times the probing-space multiplier).
    pub fn block_target_size(&self) -> usize {
        let stride = record_stride(self.order);
        let table_overhead = (PROBING_SPACE_MULTIPLIER * 8.0).ceil() as usize;
        let per_worker = self.ram_bytes / self.threads.max(1);
        (per_worker / (stride + table_overhead)).max(MIN_BLOCK_TARGET)
    }
}
