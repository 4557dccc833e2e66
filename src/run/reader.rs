//! Front-coded block reader.
//!
//! Decodes one disk block at a time through a forward cursor. The cursor
//! owns a single fixed-stride record image (the decode cache) that every
//! step overwrites in place, so a decoded view is valid only until the next
//! step; nothing decoded ever escapes the cursor.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::bits::{ceil_log2, BitsIter};
use crate::errdata;
use crate::error::{Error, Result};
use crate::order::SortOrder;
use crate::record::{Record, WordId};
use crate::run::BLOCK_BYTES;

/// One parsed disk block: header fields plus the packed payload words.
pub struct FrontCodedBlockReader {
    order: usize,
    word_bits: u8,
    count_bits: u8,
    lcp_bits: u8,
    records: u64,
    words: Vec<u64>,
}

impl FrontCodedBlockReader {
    /// Reads the next block from `input`, or `None` at end of file. The
    /// model order comes from the run manifest; it is not in the header.
    pub fn read_from<R: Read>(input: &mut R, order: usize) -> Result<Option<Self>> {
        Self::read_with_block_bytes(input, order, BLOCK_BYTES)
    }

    /// As [`read_from`](Self::read_from) with a non-default block size;
    /// paired with the writer's test seam.
    pub fn read_with_block_bytes<R: Read>(
        input: &mut R,
        order: usize,
        block_bytes: usize,
    ) -> Result<Option<Self>> {
        let word_bits = match input.read_u8() {
            Ok(bits) => bits,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let count_bits = input.read_u8()?;
        let records = input.read_u64::<LittleEndian>()?;
        if word_bits > 32 || count_bits > 64 {
            return errdata!("corrupt block header: w={word_bits} v={count_bits}");
        }

        // A non-final block carries exactly block_bytes of payload; the
        // final one stops at end of file.
        let mut payload = vec![0u8; block_bytes];
        let mut filled = 0;
        loop {
            match input.read(&mut payload[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    if filled == block_bytes {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        payload.truncate(filled);
        if records > 0 && filled == 0 {
            return errdata!("block claims {records} records but has no payload");
        }

        let mut words = Vec::with_capacity(filled.div_ceil(8));
        for chunk in payload.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            words.push(u64::from_le_bytes(word));
        }

        Ok(Some(Self {
            order,
            word_bits,
            count_bits,
            lcp_bits: ceil_log2(order as u64 + 1),
            records,
            words,
        }))
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn word_bits(&self) -> u8 {
        self.word_bits
    }

    pub fn count_bits(&self) -> u8 {
        self.count_bits
    }

    /// Forward cursor over this block's records.
    pub fn cursor<'a>(&'a self, ordering: &'a dyn SortOrder) -> RecordCursor<'a> {
        debug_assert_eq!(ordering.order(), self.order);
        RecordCursor {
            bits: BitsIter::new(&self.words, 0),
            block: self,
            ordering,
            cache: vec![0; self.order],
            count: 0,
            decoded: 0,
        }
    }
}

/// Streaming decoder over one block. Each step reconstructs the next record
/// into the reusable cache and returns a view of it.
pub struct RecordCursor<'a> {
    bits: BitsIter<'a>,
    block: &'a FrontCodedBlockReader,
    ordering: &'a dyn SortOrder,
    cache: Vec<WordId>,
    count: u64,
    decoded: u64,
}

impl RecordCursor<'_> {
    /// Decodes the next record, or `None` after the block's last. The
    /// returned view borrows the cache and dies at the next call.
    pub fn advance(&mut self) -> Option<Record<'_>> {
        if self.decoded == self.block.records {
            return None;
        }
        if self.decoded == 0 {
            self.decode_explicit();
        } else {
            let lcp = self.bits.get_bits(self.block.lcp_bits) as usize;
            if lcp == 0 {
                self.decode_explicit();
            } else {
                for rank in lcp..self.block.order {
                    let pos = self.ordering.position(rank);
                    self.cache[pos] = self.bits.get_bits(self.block.word_bits) as WordId;
                }
                self.count = self.bits.get_bits(self.block.count_bits);
            }
        }
        self.decoded += 1;
        Some(Record {
            words: &self.cache,
            count: self.count,
        })
    }

    /// An explicit record: all N word ids in storage order, then the count.
    fn decode_explicit(&mut self) {
        for pos in 0..self.block.order {
            self.cache[pos] = self.bits.get_bits(self.block.word_bits) as WordId;
        }
        self.count = self.bits.get_bits(self.block.count_bits);
    }
}

/// Walks a run file block by block.
pub struct RunReader {
    input: BufReader<File>,
    order: usize,
    block_bytes: usize,
}

impl RunReader {
    pub fn open(path: impl AsRef<Path>, order: usize) -> Result<Self> {
        Self::open_with_block_bytes(path, order, BLOCK_BYTES)
    }

    pub fn open_with_block_bytes(
        path: impl AsRef<Path>,
        order: usize,
        block_bytes: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|err| Error::IO(format!("{}: {err}", path.display())))?;
        Ok(Self {
            input: BufReader::new(file),
            order,
            block_bytes,
        })
    }

    /// Reads the next block, or `None` at end of file.
    pub fn next_block(&mut self) -> Result<Option<FrontCodedBlockReader>> {
        FrontCodedBlockReader::read_with_block_bytes(&mut self.input, self.order, self.block_bytes)
    }

    /// Decodes every remaining record into owned form. Convenience for the
    /// downstream merge's smallest inputs and for tests; bulk consumers
    /// should walk blocks and cursors instead.
    pub fn collect_records(&mut self, ordering: &dyn SortOrder) -> Result<Vec<(Vec<WordId>, u64)>> {
        let mut out = Vec::new();
        while let Some(block) = self.next_block()? {
            let mut cursor = block.cursor(ordering);
            while let Some(record) = cursor.advance() {
                out.push((record.words.to_vec(), record.count));
            }
        }
        Ok(out)
    }
}
