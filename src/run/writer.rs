//! Front-coded block writer.
//!
//! Consumes a sorted record iterator and appends fixed-size disk blocks to
//! an output stream. Compression is front coding under the run's ordering
//! schedule: a record that shares a schedule prefix with its predecessor
//! stores only the prefix length and the remaining word ids.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::bits::{ceil_log2, BitBuffer};
use crate::errinput;
use crate::error::Result;
use crate::order::SortOrder;
use crate::record::{BlockStats, Record};
use crate::run::BLOCK_BYTES;

/// Totals for one written run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records: u64,
    pub blocks: u64,
    pub bytes: u64,
}

/// Writes sorted records as front-coded disk blocks.
pub struct FrontCodedWriter {
    order: usize,
    lcp_bits: u8,
    block_bytes: usize,
    buffer: BitBuffer,
}

impl FrontCodedWriter {
    pub fn new(order: usize) -> Self {
        Self::with_block_bytes(order, BLOCK_BYTES)
    }

    /// Writer with a non-default block size; exercised by tests that need
    /// multi-block output from a handful of records.
    pub fn with_block_bytes(order: usize, block_bytes: usize) -> Self {
        Self {
            order,
            lcp_bits: ceil_log2(order as u64 + 1),
            block_bytes,
            buffer: BitBuffer::new(),
        }
    }

    /// Streams `records` (already sorted by `ordering`) into `out` as disk
    /// blocks sized for this writer. `stats` must bound every word id and
    /// count in the stream; it fixes the block bit widths.
    pub fn write_run<'a, W, I>(
        &mut self,
        out: &mut W,
        records: I,
        stats: &BlockStats,
        ordering: &dyn SortOrder,
    ) -> Result<RunSummary>
    where
        W: Write,
        I: IntoIterator<Item = Record<'a>>,
    {
        let word_bits = stats.word_bits();
        let count_bits = stats.count_bits();
        let max_record_bits =
            self.lcp_bits as usize + self.order * word_bits as usize + count_bits as usize;
        let block_bits = self.block_bytes * 8;
        if max_record_bits > block_bits {
            return errinput!(
                "block size of {} bytes cannot hold a {}-bit record",
                self.block_bytes,
                max_record_bits
            );
        }

        let mut summary = RunSummary::default();
        let mut iter = records.into_iter();
        let Some(first) = iter.next() else {
            return Ok(summary);
        };

        self.buffer.clear();
        self.buffer.reserve(block_bits as u64);
        self.encode_explicit(&first, word_bits, count_bits);
        summary.records = 1;
        let mut in_block: u64 = 1;
        let mut prev = first;

        for record in iter {
            if self.buffer.len() as usize + max_record_bits > block_bits {
                summary.bytes += self.flush_block(out, word_bits, count_bits, in_block, true)?;
                summary.blocks += 1;
                self.buffer.clear();
                self.encode_explicit(&record, word_bits, count_bits);
                in_block = 1;
            } else {
                let lcp = ordering.lcp(prev.words, record.words);
                debug_assert!(lcp < self.order, "duplicate key reached the writer");
                self.buffer.append(lcp as u64, self.lcp_bits);
                if lcp == 0 {
                    self.encode_explicit(&record, word_bits, count_bits);
                } else {
                    for rank in lcp..self.order {
                        self.buffer
                            .append(record.words[ordering.position(rank)] as u64, word_bits);
                    }
                    self.buffer.append(record.count, count_bits);
                }
                in_block += 1;
            }
            summary.records += 1;
            prev = record;
        }

        summary.bytes += self.flush_block(out, word_bits, count_bits, in_block, false)?;
        summary.blocks += 1;
        Ok(summary)
    }

    /// An explicit record: all N word ids in storage order, then the count.
    /// Used for the first record of a block and after a zero lcp.
    fn encode_explicit(&mut self, record: &Record, word_bits: u8, count_bits: u8) {
        for &word in record.words {
            self.buffer.append(word as u64, word_bits);
        }
        self.buffer.append(record.count, count_bits);
    }

    /// Writes one block: header, payload, and (for non-final blocks) zero
    /// padding up to the exact block size. Returns the bytes written.
    fn flush_block<W: Write>(
        &mut self,
        out: &mut W,
        word_bits: u8,
        count_bits: u8,
        records: u64,
        full: bool,
    ) -> Result<u64> {
        let payload_bytes = if full {
            self.block_bytes
        } else {
            self.buffer.byte_len()
        };
        tracing::debug!(
            w = word_bits,
            v = count_bits,
            records,
            payload_bytes,
            "flushing run block"
        );

        out.write_u8(word_bits)?;
        out.write_u8(count_bits)?;
        out.write_u64::<LittleEndian>(records)?;

        let mut written = 0usize;
        for word in self.buffer.words() {
            let bytes = word.to_le_bytes();
            let take = bytes.len().min(payload_bytes - written);
            out.write_all(&bytes[..take])?;
            written += take;
            if written == payload_bytes {
                break;
            }
        }
        const ZEROS: [u8; 4096] = [0; 4096];
        while written < payload_bytes {
            let take = ZEROS.len().min(payload_bytes - written);
            out.write_all(&ZEROS[..take])?;
            written += take;
        }

        Ok(10 + payload_bytes as u64)
    }
}
