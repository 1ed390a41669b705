//! Streaming gear-hash chunker.
//!
//! The chunker pulls bytes from a [`PipeReader`] and yields chunks of
//! `[min_size, max_size]` bytes together with their offset in the stream.
//! A cut is placed where the gear rolling hash masks to zero; positions
//! before the target average use the stricter mask, positions after it the
//! looser one, which pulls the size distribution toward the average. If no
//! cut fires by `max_size` the chunk is cut there, and closing the pipe
//! drains whatever remains as a final short chunk.

use crate::gear::GEAR_TABLE;
use crate::params::{CHUNK_AVG_SIZE_TARGET, CHUNK_MAX_SIZE, CHUNK_MIN_SIZE, MASK_L, MASK_S};
use crate::pipe::PipeReader;

const READ_BLOCK: usize = 32 * 1024;

/// Parameters for the chunking algorithm.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerParams {
    /// Minimum chunk size in bytes.
    pub min_size: usize,
    /// Maximum chunk size in bytes.
    pub max_size: usize,
    /// Target average chunk size.
    pub avg_size: usize,
    /// Mask for positions before the average.
    pub mask_s: u64,
    /// Mask for positions at or after the average.
    pub mask_l: u64,
}

impl Default for ChunkerParams {
    fn default() -> Self {
        Self {
            min_size: CHUNK_MIN_SIZE,
            max_size: CHUNK_MAX_SIZE,
            avg_size: CHUNK_AVG_SIZE_TARGET,
            mask_s: MASK_S,
            mask_l: MASK_L,
        }
    }
}

/// Finds the cut length for the front chunk of `data`.
///
/// The caller must ensure that either `data.len() >= max_size` or the
/// stream has ended, otherwise a later byte could have moved the cut.
fn find_cut(data: &[u8], params: &ChunkerParams) -> usize {
    if data.len() <= params.min_size {
        return data.len();
    }
    let gear = &*GEAR_TABLE;
    let mut hash = 0u64;
    let end = data.len().min(params.max_size);
    for (i, &byte) in data.iter().enumerate().take(end).skip(params.min_size) {
        hash = (hash << 1).wrapping_add(gear[byte as usize]);
        let mask = if i < params.avg_size {
            params.mask_s
        } else {
            params.mask_l
        };
        if hash & mask == 0 {
            return i + 1;
        }
    }
    end
}

/// Chunks a complete slice, returning `(start, end)` boundary pairs.
///
/// Empty input produces no chunks.
pub fn chunk_slice(data: &[u8], params: &ChunkerParams) -> Vec<(usize, usize)> {
    let mut boundaries = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let cut = find_cut(&data[pos..], params);
        boundaries.push((pos, pos + cut));
        pos += cut;
    }
    boundaries
}

/// Streaming chunker over a byte pipe.
pub struct Chunker {
    reader: PipeReader,
    params: ChunkerParams,
    buf: Vec<u8>,
    offset: u64,
    eof: bool,
}

impl Chunker {
    /// Creates a chunker reading from `reader`.
    pub fn new(reader: PipeReader, params: ChunkerParams) -> Self {
        Self {
            reader,
            params,
            buf: Vec::with_capacity(params.max_size),
            offset: 0,
            eof: false,
        }
    }

    /// Number of bytes consumed from the stream so far.
    pub fn position(&self) -> u64 {
        self.offset
    }

    fn fill(&mut self) {
        let mut block = [0u8; READ_BLOCK];
        while !self.eof && self.buf.len() < self.params.max_size {
            let want = (self.params.max_size - self.buf.len()).min(READ_BLOCK);
            let n = self.reader.read(&mut block[..want]);
            if n == 0 {
                self.eof = true;
                break;
            }
            self.buf.extend_from_slice(&block[..n]);
        }
    }

    /// Blocks until the next chunk is available and returns it with its
    /// stream offset. Returns `None` once the pipe is closed and drained.
    pub fn next_chunk(&mut self) -> Option<(u64, Vec<u8>)> {
        self.fill();
        if self.buf.is_empty() {
            return None;
        }
        let cut = find_cut(&self.buf, &self.params);
        let rest = self.buf.split_off(cut);
        let chunk = std::mem::replace(&mut self.buf, rest);
        let offset = self.offset;
        self.offset += chunk.len() as u64;
        Some((offset, chunk))
    }
}
