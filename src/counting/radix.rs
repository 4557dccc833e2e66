//! Parallel LSD radix sort over a packed record arena.
//!
//! Digits are word ids, taken from least- to most-significant schedule rank,
//! so the final order is the comparator's order even though keys are never
//! rewritten into schedule form. Every pass is a stable counting sort:
//! per-chunk histograms in parallel, a bucket-major prefix sum, then a
//! parallel scatter into disjoint destination ranges.

use rayon::prelude::*;

use crate::bits::ceil_log2;
use crate::order::SortOrder;
use crate::record::{NgramArena, WordId};

/// Widest radix used for a single pass. Wider digits are split into
/// multiple sub-passes of at most this many bits.
const MAX_RADIX_BITS: u8 = 16;

/// Sorts the arena by `order`. `max_word_id` bounds every digit and sizes
/// the radix. The arena is physically reordered; any table of arena ids
/// held by the caller is invalid afterwards.
pub fn sort(arena: &mut NgramArena, order: &dyn SortOrder, max_word_id: WordId) {
    let len = arena.len();
    if len <= 1 {
        return;
    }

    let digit_bits = ceil_log2(max_word_id as u64 + 1).max(1);
    let mut perm: Vec<u32> = (0..len as u32).collect();
    let mut scratch = vec![0u32; len];

    for rank in (0..order.order()).rev() {
        let pos = order.position(rank);
        let mut shift = 0u8;
        while shift < digit_bits {
            let bits = (digit_bits - shift).min(MAX_RADIX_BITS);
            counting_pass(arena, &mut perm, &mut scratch, pos, shift, bits);
            shift += bits;
        }
    }

    arena.reorder(&perm);
}

/// One stable counting-sort pass on the digit `(word[pos] >> shift) & mask`.
fn counting_pass(
    arena: &NgramArena,
    perm: &mut Vec<u32>,
    scratch: &mut Vec<u32>,
    pos: usize,
    shift: u8,
    bits: u8,
) {
    let buckets = 1usize << bits;
    let mask = (buckets - 1) as WordId;
    let len = perm.len();
    let chunk = len.div_ceil(rayon::current_num_threads().max(1));

    let digit = |id: u32| ((arena.key(id as usize)[pos] >> shift) & mask) as usize;

    let mut histograms: Vec<Vec<u32>> = perm
        .par_chunks(chunk)
        .map(|ids| {
            let mut hist = vec![0u32; buckets];
            for &id in ids {
                hist[digit(id)] += 1;
            }
            hist
        })
        .collect();

    // Bucket-major prefix sum: chunk c's slice of bucket b starts after all
    // lower buckets and after bucket b's share of earlier chunks. That makes
    // every (chunk, bucket) destination range disjoint and keeps the pass
    // stable.
    let mut sum = 0u32;
    for bucket in 0..buckets {
        for hist in histograms.iter_mut() {
            let count = hist[bucket];
            hist[bucket] = sum;
            sum += count;
        }
    }

    let dst = SharedSlice::new(scratch);
    perm.par_chunks(chunk)
        .zip(histograms.par_iter_mut())
        .for_each(|(ids, offsets)| {
            for &id in ids {
                let bucket = digit(id);
                let at = offsets[bucket] as usize;
                offsets[bucket] += 1;
                // Safety: destination indices partition 0..len across
                // (chunk, bucket) pairs, so no two workers write one slot.
                unsafe { dst.write(at, id) };
            }
        });

    std::mem::swap(perm, scratch);
}

/// Raw shared view of a scatter destination. Writers must target disjoint
/// indices.
struct SharedSlice<T> {
    ptr: *mut T,
    len: usize,
}

unsafe impl<T: Send> Sync for SharedSlice<T> {}

impl<T> SharedSlice<T> {
    fn new(slice: &mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    unsafe fn write(&self, index: usize, value: T) {
        debug_assert!(index < self.len);
        unsafe { self.ptr.add(index).write(value) };
    }
}
