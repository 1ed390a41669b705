//! In-memory chunk buffer.
//!
//! A [`ChunkBuf`] is the malleable in-memory form of one file's byte
//! stream during an open session: a sequence of data chunks followed by a
//! single end-of-file marker. Invariants:
//!
//! - the first chunk starts at offset 0 and chunks are contiguous,
//! - exactly one EOF marker exists and it is always last,
//! - the EOF marker's offset is the total length.
//!
//! Bytes written to the buffer pass through a content-defined chunker
//! running on its own thread; each chunk the chunker emits is spliced into
//! the sequence by [`inject`](ChunkBuf::inject) without disturbing bytes
//! outside its range. Chunks loaded from existing chunk pointers start out
//! as hash-only placeholders and are fetched lazily through a
//! [`ChunkSource`] when a read or an overlapping injection needs their
//! bytes.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::Mutex;
use silt_cdc::{pipe, Chunker, ChunkerParams, PipeWriter};
use silt_core::ChunkHash;
use silt_store::StoreError;
use tracing::debug;

use crate::error::ErrorKind;

/// Fetches chunk bodies by content hash for lazy placeholder resolution.
pub trait ChunkSource: Send + Sync {
    /// Returns the chunk body stored under `hash`.
    fn fetch(&self, hash: &ChunkHash) -> Result<Bytes, ErrorKind>;
}

/// One element of the chunk sequence.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Absolute offset of the first byte in the file.
    pub offset: u64,
    /// Chunk bytes; `None` for placeholders and the EOF marker.
    pub data: Option<Bytes>,
    /// Content hash, known for placeholders and synced chunks.
    pub hash: Option<ChunkHash>,
    /// True only for the trailing end-of-file marker.
    pub eof: bool,
    /// True while the body has not been written to the store yet.
    pub dirty: bool,
}

impl Chunk {
    fn data(offset: u64, data: Bytes) -> Self {
        Self {
            offset,
            data: Some(data),
            hash: None,
            eof: false,
            dirty: true,
        }
    }

    fn placeholder(offset: u64, hash: ChunkHash) -> Self {
        Self {
            offset,
            data: None,
            hash: Some(hash),
            eof: false,
            dirty: false,
        }
    }

    fn eof_marker(offset: u64) -> Self {
        Self {
            offset,
            data: None,
            hash: None,
            eof: true,
            dirty: false,
        }
    }
}

/// A chunk ready to be persisted: its offset, content hash, and the body
/// when it is not already stored.
#[derive(Debug, Clone)]
pub struct SyncChunk {
    /// Absolute file offset.
    pub offset: u64,
    /// Content hash of the chunk body.
    pub hash: ChunkHash,
    /// Body bytes for chunks the store has not seen yet.
    pub body: Option<Bytes>,
}

/// The in-memory chunk sequence plus the chunker pipeline feeding it.
pub struct ChunkBuf {
    chunks: Arc<Mutex<Vec<Chunk>>>,
    source: Arc<dyn ChunkSource>,
    params: ChunkerParams,
    pipe_capacity: usize,
    pos: u64,
    writer: Option<PipeWriter>,
    worker: Option<JoinHandle<Result<(), ErrorKind>>>,
}

impl ChunkBuf {
    /// Creates an empty buffer: a lone EOF marker at offset 0.
    pub fn new(source: Arc<dyn ChunkSource>, params: ChunkerParams, pipe_capacity: usize) -> Self {
        Self {
            chunks: Arc::new(Mutex::new(vec![Chunk::eof_marker(0)])),
            source,
            params,
            pipe_capacity,
            pos: 0,
            writer: None,
            worker: None,
        }
    }

    /// Creates a buffer over existing chunk pointers. The pointers must be
    /// in ascending offset order with the zero-hash EOF marker last, as
    /// they come out of a chunk-pointer scan.
    pub fn from_ptrs(
        source: Arc<dyn ChunkSource>,
        params: ChunkerParams,
        pipe_capacity: usize,
        ptrs: &[(u64, ChunkHash)],
    ) -> Self {
        let mut chunks = Vec::with_capacity(ptrs.len() + 1);
        for &(offset, hash) in ptrs {
            if hash.is_zero() {
                chunks.push(Chunk::eof_marker(offset));
                break;
            }
            chunks.push(Chunk::placeholder(offset, hash));
        }
        if !chunks.last().is_some_and(|c| c.eof) {
            let end = chunks.last().map_or(0, |c| c.offset);
            chunks.push(Chunk::eof_marker(end));
        }
        let mut buf = Self::new(source, params, pipe_capacity);
        buf.chunks = Arc::new(Mutex::new(chunks));
        buf
    }

    /// Total length in bytes: the EOF marker's offset.
    pub fn len(&self) -> u64 {
        self.chunks.lock().last().expect("EOF marker present").offset
    }

    /// Returns true when the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current write position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Splices `data` into the sequence at `offset`, overwriting the
    /// covered range and keeping every byte outside `[offset, offset+len)`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` lies past the current end of file; writes beyond
    /// EOF are not supported.
    pub fn inject(&self, offset: u64, data: Bytes) -> Result<(), ErrorKind> {
        let mut chunks = self.chunks.lock();
        inject_into(&mut chunks, self.source.as_ref(), offset, data)
    }

    /// Closes the live chunker so it drains buffered bytes into a final
    /// chunk, waits for all injections, then stands up a fresh chunker at
    /// the current write position. Safe to call with no chunker active;
    /// calling it twice in a row is a no-op in between.
    pub fn flush(&mut self) -> Result<(), ErrorKind> {
        self.drain()?;
        self.start_chunker();
        Ok(())
    }

    /// Drains the live chunker, then moves the write position to `pos`.
    /// The next write feeds a fresh chunker whose chunks land at `pos`
    /// onward.
    pub fn seek(&mut self, pos: u64) -> Result<(), ErrorKind> {
        self.drain()?;
        self.pos = pos;
        self.start_chunker();
        Ok(())
    }

    /// Closes the pipe and waits until every produced chunk is injected.
    fn drain(&mut self) -> Result<(), ErrorKind> {
        if let Some(writer) = self.writer.take() {
            writer.close();
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| worker_failed("chunk worker panicked"))??;
        }
        Ok(())
    }

    /// Stands up a chunker anchored at the current write position.
    fn start_chunker(&mut self) {
        let (writer, reader) = pipe(self.pipe_capacity);
        let chunks = Arc::clone(&self.chunks);
        let source = Arc::clone(&self.source);
        let params = self.params;
        let base = self.pos;
        self.worker = Some(thread::spawn(move || {
            let mut chunker = Chunker::new(reader, params);
            while let Some((start, bytes)) = chunker.next_chunk() {
                debug!(offset = base + start, len = bytes.len(), "inject chunk");
                let mut chunks = chunks.lock();
                inject_into(&mut chunks, source.as_ref(), base + start, Bytes::from(bytes))?;
            }
            Ok(())
        }));
        self.writer = Some(writer);
    }

    /// Pushes bytes into the chunker and advances the write position.
    /// The chunker may buffer up to its maximum chunk size before any
    /// chunk becomes visible; `flush` forces the residue out.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ErrorKind> {
        if self.writer.is_none() {
            self.flush()?;
        }
        let writer = self.writer.as_ref().expect("flush installed a writer");
        match writer.write(data) {
            Ok(n) => {
                self.pos += n as u64;
                Ok(n)
            }
            Err(_) => {
                // The worker dropped its pipe end; surface its error.
                self.writer = None;
                match self.worker.take() {
                    Some(worker) => match worker.join() {
                        Ok(Ok(())) => Err(worker_failed("chunk pipeline closed")),
                        Ok(Err(err)) => Err(err),
                        Err(_) => Err(worker_failed("chunk worker panicked")),
                    },
                    None => Err(worker_failed("chunk pipeline closed")),
                }
            }
        }
    }

    /// Reads bytes at `offset` into `buf`, fetching placeholder bodies
    /// from the chunk source as needed. Returns the number of bytes read;
    /// 0 means end of file. Flushes first so every written byte is
    /// visible.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ErrorKind> {
        self.flush()?;
        let mut chunks = self.chunks.lock();
        let mut copied = 0;
        let mut offset = offset;
        while copied < buf.len() {
            // Last chunk starting at or before the read offset.
            let idx = chunks.partition_point(|c| c.offset <= offset);
            if idx == 0 {
                break;
            }
            let idx = idx - 1;
            if chunks[idx].eof {
                break;
            }
            let end = chunks[idx + 1].offset;
            if offset >= end {
                break;
            }
            let bytes = resolve(&mut chunks[idx], self.source.as_ref())?;
            let within = (offset - chunks[idx].offset) as usize;
            let take = ((end - offset) as usize).min(buf.len() - copied);
            buf[copied..copied + take].copy_from_slice(&bytes[within..within + take]);
            copied += take;
            offset += take as u64;
        }
        Ok(copied)
    }

    /// Flushes and returns every chunk in persistence form, plus the EOF
    /// offset. Bodies are included only for chunks not yet stored; call
    /// [`finish_sync`](ChunkBuf::finish_sync) after they are.
    pub fn begin_sync(&mut self) -> Result<(Vec<SyncChunk>, u64), ErrorKind> {
        self.flush()?;
        let mut chunks = self.chunks.lock();
        let mut out = Vec::with_capacity(chunks.len());
        let mut eof = 0;
        for chunk in chunks.iter_mut() {
            if chunk.eof {
                eof = chunk.offset;
                continue;
            }
            if chunk.hash.is_none() {
                let data = chunk.data.as_ref().expect("unsynced chunk carries bytes");
                chunk.hash = Some(ChunkHash::of(data));
            }
            out.push(SyncChunk {
                offset: chunk.offset,
                hash: chunk.hash.expect("hash just ensured"),
                body: chunk.dirty.then(|| {
                    chunk
                        .data
                        .clone()
                        .expect("dirty chunk carries bytes")
                }),
            });
        }
        Ok((out, eof))
    }

    /// Marks every chunk clean after a successful sync.
    pub fn finish_sync(&mut self) {
        for chunk in self.chunks.lock().iter_mut() {
            chunk.dirty = false;
        }
    }

    /// Clones the current chunk sequence, for inspection in tests and
    /// diagnostics.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.chunks.lock().clone()
    }
}

impl Drop for ChunkBuf {
    fn drop(&mut self) {
        // Unblock and reap the worker. Dropping without sync discards
        // unflushed bytes.
        if let Some(writer) = self.writer.take() {
            writer.close();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_failed(message: &str) -> ErrorKind {
    ErrorKind::Store(StoreError::Database(message.to_string()))
}

/// Returns the chunk's bytes, fetching and caching them if the chunk is a
/// placeholder.
fn resolve(chunk: &mut Chunk, source: &dyn ChunkSource) -> Result<Bytes, ErrorKind> {
    if let Some(data) = &chunk.data {
        return Ok(data.clone());
    }
    let hash = chunk.hash.expect("placeholder carries a hash");
    let data = source.fetch(&hash)?;
    chunk.data = Some(data.clone());
    Ok(data)
}

/// Splices a new chunk into the sequence.
///
/// Walks the existing chunks; chunks fully outside `[offset, end)` are
/// kept, a chunk overlapped on its left keeps its prefix, one overlapped
/// on its right keeps its suffix (shifted to `end`), and fully covered
/// chunks are dropped. The new chunk is emitted exactly once, at the first
/// overlap or before the EOF marker, whose offset moves to `end` when the
/// injection extends the file.
fn inject_into(
    chunks: &mut Vec<Chunk>,
    source: &dyn ChunkSource,
    offset: u64,
    data: Bytes,
) -> Result<(), ErrorKind> {
    if data.is_empty() {
        return Ok(());
    }
    let end = offset + data.len() as u64;
    let mut out: Vec<Chunk> = Vec::with_capacity(chunks.len() + 2);
    let mut injected = false;

    for i in 0..chunks.len() {
        if chunks[i].eof {
            let eof_offset = chunks[i].offset;
            if !injected {
                assert!(
                    offset <= eof_offset,
                    "inject at {} past end of file {}",
                    offset,
                    eof_offset
                );
                out.push(Chunk::data(offset, data.clone()));
                injected = true;
            }
            out.push(Chunk::eof_marker(eof_offset.max(end)));
            break;
        }

        let left = chunks[i].offset;
        let right = chunks
            .get(i + 1)
            .map(|c| c.offset)
            .expect("EOF marker terminates the sequence");

        if offset >= right || left >= end {
            // No contact with the new range.
            out.push(chunks[i].clone());
            continue;
        }

        if offset > left {
            // The new chunk starts inside this one: keep the left part.
            let bytes = resolve(&mut chunks[i], source)?;
            out.push(Chunk::data(left, bytes.slice(..(offset - left) as usize)));
        }
        if !injected {
            out.push(Chunk::data(offset, data.clone()));
            injected = true;
        }
        if end < right {
            // The new chunk ends inside this one: keep the right part,
            // shifted to start at `end`.
            let bytes = resolve(&mut chunks[i], source)?;
            out.push(Chunk::data(end, bytes.slice((end - left) as usize..)));
        }
        // Anything else of this chunk is covered by the new bytes.
    }

    *chunks = out;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    /// Source for tests that never expect a fetch.
    struct NoFetch;

    impl ChunkSource for NoFetch {
        fn fetch(&self, hash: &ChunkHash) -> Result<Bytes, ErrorKind> {
            panic!("unexpected fetch of {}", hash);
        }
    }

    /// Source serving from a fixed map.
    struct MapSource(HashMap<ChunkHash, Bytes>);

    impl ChunkSource for MapSource {
        fn fetch(&self, hash: &ChunkHash) -> Result<Bytes, ErrorKind> {
            self.0
                .get(hash)
                .cloned()
                .ok_or(ErrorKind::NotExist)
        }
    }

    fn test_params() -> ChunkerParams {
        ChunkerParams {
            min_size: 1024,
            max_size: 8 * 1024,
            avg_size: 2 * 1024,
            mask_s: (1 << 12) - 1,
            mask_l: (1 << 10) - 1,
        }
    }

    fn empty_buf() -> ChunkBuf {
        ChunkBuf::new(Arc::new(NoFetch), test_params(), 4 * 1024)
    }

    /// Builds a buffer of two-byte data chunks `[0,2),[2,4),…` plus EOF.
    fn fixture(pairs: &[(u64, &[u8])], eof: u64) -> ChunkBuf {
        let buf = empty_buf();
        {
            let mut chunks = buf.chunks.lock();
            chunks.clear();
            for &(offset, data) in pairs {
                chunks.push(Chunk::data(offset, Bytes::copy_from_slice(data)));
            }
            chunks.push(Chunk::eof_marker(eof));
        }
        buf
    }

    fn concat(buf: &ChunkBuf) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in buf.chunks() {
            if let Some(data) = &chunk.data {
                out.extend_from_slice(data);
            }
        }
        out
    }

    // before: [0 -- --][2 -- --][4 -- --][6 -- --][8 -- --][10 EOF]
    // inject:                [3 -- -- -- -- ]
    //  after: [0 -- --][2 --][3 -- -- -- -- ][7 --][8 -- --][10 EOF]
    #[test]
    fn test_inject_middle() {
        let buf = fixture(
            &[
                (0, &[0x00, 0x01]),
                (2, &[0x02, 0x03]),
                (4, &[0x04, 0x05]),
                (6, &[0x06, 0x07]),
                (8, &[0x08, 0x09]),
            ],
            10,
        );
        buf.inject(3, Bytes::from_static(&[0x03, 0x04, 0x05, 0x06]))
            .unwrap();

        let chunks = buf.chunks();
        assert_eq!(chunks.len(), 6);
        assert!(chunks.last().unwrap().eof);
        assert_eq!(chunks.last().unwrap().offset, 10);
        assert_eq!(chunks[3].offset, 7, "suffix shifted to injection end");
        assert_eq!(concat(&buf), (0x00..=0x09).collect::<Vec<u8>>());
    }

    // before: [0 -- --][2 -- --][4 -- --][6 EOF]
    // inject:                         [5 -- -- -- -- ]
    //  after: [0 -- --][2 -- --][4 --][5 -- -- -- -- ][9 EOF]
    #[test]
    fn test_inject_end() {
        let buf = fixture(&[(0, &[0x00, 0x01]), (2, &[0x02, 0x03]), (4, &[0x04, 0x05])], 6);
        buf.inject(5, Bytes::from_static(&[0x05, 0x06, 0x07, 0x08]))
            .unwrap();

        let chunks = buf.chunks();
        assert_eq!(chunks.len(), 5);
        assert!(chunks.last().unwrap().eof);
        assert_eq!(chunks.last().unwrap().offset, 9, "EOF shifted out");
        assert_eq!(concat(&buf), (0x00..=0x08).collect::<Vec<u8>>());
    }

    // before: [0 -- --][2 -- --][4 -- --][6 EOF]
    // inject:                [3 -- -- -- -- ]
    //  after: [0 -- --][2 --][3 -- -- -- -- ][7 EOF]
    #[test]
    fn test_inject_middle_end() {
        let buf = fixture(&[(0, &[0x00, 0x01]), (2, &[0x02, 0x03]), (4, &[0x04, 0x05])], 6);
        buf.inject(3, Bytes::from_static(&[0x03, 0x04, 0x05, 0x06]))
            .unwrap();

        let chunks = buf.chunks();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.last().unwrap().eof);
        assert_eq!(chunks.last().unwrap().offset, 7);
        assert_eq!(concat(&buf), (0x00..=0x06).collect::<Vec<u8>>());
    }

    // before: [0 -- --][2 -- --][4 -- --][6 EOF]
    // inject: [0 -- -- -- -- --]
    //  after: [0 -- -- -- -- --][5 --][6 EOF]
    #[test]
    fn test_inject_middle_start() {
        let buf = fixture(&[(0, &[0x00, 0x01]), (2, &[0x02, 0x03]), (4, &[0x04, 0x05])], 6);
        buf.inject(0, Bytes::from_static(&[0x00, 0x01, 0x02, 0x03, 0x04]))
            .unwrap();

        let chunks = buf.chunks();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.last().unwrap().eof);
        assert_eq!(chunks[1].offset, 5);
        assert_eq!(concat(&buf), (0x00..=0x05).collect::<Vec<u8>>());
    }

    // before: [0 -- --][2 -- --][4 -- --][6 EOF]
    // inject: [0 -- -- -- --]
    //  after: [0 -- -- -- --][4 -- --][6 EOF]
    #[test]
    fn test_inject_precise_two_block_overwrite() {
        let buf = fixture(&[(0, &[0x00, 0x01]), (2, &[0x02, 0x03]), (4, &[0x04, 0x05])], 6);
        buf.inject(0, Bytes::from_static(&[0x00, 0x01, 0x02, 0x03]))
            .unwrap();

        let chunks = buf.chunks();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.last().unwrap().eof);
        assert_eq!(chunks[1].offset, 4);
        assert_eq!(concat(&buf), (0x00..=0x05).collect::<Vec<u8>>());
    }

    // before: [0 -- --][2 -- --][4 -- --][6 EOF]
    // inject:          [2 ++ ++]
    //  after: [0 -- --][2 ++ ++][4 -- --][6 EOF]
    #[test]
    fn test_inject_precise_one_block_overwrite() {
        let buf = fixture(&[(0, &[0x00, 0x01]), (2, &[0x02, 0x03]), (4, &[0x04, 0x05])], 6);
        buf.inject(2, Bytes::from_static(&[0x88, 0x88])).unwrap();

        let chunks = buf.chunks();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.last().unwrap().eof);
        assert_eq!(chunks[1].offset, 2);
        assert_eq!(concat(&buf), vec![0x00, 0x01, 0x88, 0x88, 0x04, 0x05]);
    }

    // before: [0 EOF]
    // inject: [0 -- --]
    //  after: [0 -- --][2 EOF]
    #[test]
    fn test_inject_into_empty() {
        let buf = empty_buf();
        buf.inject(0, Bytes::from_static(&[0x00, 0x01])).unwrap();

        let chunks = buf.chunks();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.last().unwrap().eof);
        assert_eq!(chunks.last().unwrap().offset, 2);
        assert_eq!(concat(&buf), vec![0x00, 0x01]);
    }

    // before: [0 .. 10)[10 EOF]
    // inject:    [3 ++ ++]
    //  after: [0 .. 3)[3 ++ ++][5 .. 10)[10 EOF]
    #[test]
    fn test_inject_inside_single_chunk() {
        let buf = fixture(&[(0, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9])], 10);
        buf.inject(3, Bytes::from_static(&[0x88, 0x99])).unwrap();

        let chunks = buf.chunks();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.last().unwrap().offset, 10, "EOF untouched");
        assert_eq!(
            concat(&buf),
            vec![0, 1, 2, 0x88, 0x99, 5, 6, 7, 8, 9],
            "bytes outside the injected range survive"
        );
    }

    #[test]
    fn test_inject_roundtrip_property() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        for _ in 0..200 {
            // Random initial content split into random chunks.
            let len = rng.gen_range(1..=64usize);
            let mut content: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

            let buf = empty_buf();
            {
                let mut chunks = buf.chunks.lock();
                chunks.clear();
                let mut pos = 0;
                while pos < len {
                    let take = rng.gen_range(1..=(len - pos));
                    chunks.push(Chunk::data(
                        pos as u64,
                        Bytes::copy_from_slice(&content[pos..pos + take]),
                    ));
                    pos += take;
                }
                chunks.push(Chunk::eof_marker(len as u64));
            }

            let off = rng.gen_range(0..len);
            let data_len = rng.gen_range(1..=(len - off));
            let data: Vec<u8> = (0..data_len).map(|_| rng.gen()).collect();
            buf.inject(off as u64, Bytes::from(data.clone())).unwrap();

            content.splice(off..off + data_len, data);
            assert_eq!(concat(&buf), content, "off={} len={}", off, data_len);
        }
    }

    #[test]
    fn test_inject_resolves_placeholders() {
        let body = Bytes::from_static(&[10, 11, 12, 13, 14, 15]);
        let hash = ChunkHash::of(&body);
        let source = MapSource(HashMap::from([(hash, body)]));
        let buf = ChunkBuf::from_ptrs(
            Arc::new(source),
            test_params(),
            1024,
            &[(0, hash), (6, ChunkHash::zero())],
        );

        buf.inject(2, Bytes::from_static(&[0xAA, 0xBB])).unwrap();
        assert_eq!(concat(&buf), vec![10, 11, 0xAA, 0xBB, 14, 15]);

        // The sliced prefix and suffix are new bodies, so they are dirty.
        let chunks = buf.chunks();
        assert!(chunks[0].dirty);
        assert!(chunks[2].dirty);
    }

    #[test]
    fn test_write_flush_past_max_size() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let mut input = vec![0u8; 64 * 1024];
        rng.fill(&mut input[..]);

        let mut buf = empty_buf();
        let n = buf.write(&input).unwrap();
        assert_eq!(n, input.len());
        buf.flush().unwrap();

        let chunks = buf.chunks();
        assert!(chunks.len() >= 3, "expected at least two data chunks");
        assert_eq!(buf.len(), input.len() as u64);
        assert_eq!(concat(&buf), input);
    }

    #[test]
    fn test_write_after_flush_appends() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(17);
        let mut first = vec![0u8; 24 * 1024];
        let mut second = vec![0u8; 8 * 1024];
        rng.fill(&mut first[..]);
        rng.fill(&mut second[..]);

        let mut buf = empty_buf();
        buf.write(&first).unwrap();
        buf.flush().unwrap();
        buf.write(&second).unwrap();
        buf.flush().unwrap();

        let mut expected = first;
        expected.extend_from_slice(&second);
        assert_eq!(buf.len(), expected.len() as u64);
        assert_eq!(concat(&buf), expected);
    }

    #[test]
    fn test_flush_idempotent() {
        let mut buf = empty_buf();
        buf.flush().unwrap();
        buf.flush().unwrap();
        buf.write(b"x").unwrap();
        buf.flush().unwrap();
        buf.flush().unwrap();
        assert_eq!(concat(&buf), b"x");
    }

    #[test]
    fn test_seek_overwrite_middle() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(29);
        let mut base = vec![0u8; 16 * 1024];
        rng.fill(&mut base[..]);

        let mut buf = empty_buf();
        buf.write(&base).unwrap();
        buf.seek(4096).unwrap();
        let patch = vec![0xEEu8; 2048];
        buf.write(&patch).unwrap();
        buf.flush().unwrap();

        let mut expected = base;
        expected[4096..4096 + 2048].copy_from_slice(&patch);
        assert_eq!(concat(&buf), expected);
        assert_eq!(buf.len(), expected.len() as u64);
    }

    #[test]
    fn test_read_at() {
        let mut buf = empty_buf();
        buf.write(b"hello world").unwrap();

        let mut out = [0u8; 5];
        assert_eq!(buf.read_at(&mut out, 6).unwrap(), 5);
        assert_eq!(&out, b"world");

        assert_eq!(buf.read_at(&mut out, 11).unwrap(), 0, "read at EOF");
        assert_eq!(buf.read_at(&mut out, 100).unwrap(), 0, "read past EOF");

        let mut all = [0u8; 32];
        assert_eq!(buf.read_at(&mut all, 0).unwrap(), 11);
        assert_eq!(&all[..11], b"hello world");
    }

    #[test]
    fn test_read_at_fetches_placeholder() {
        let body = Bytes::from_static(b"persisted chunk body");
        let hash = ChunkHash::of(&body);
        let source = MapSource(HashMap::from([(hash, body.clone())]));
        let mut buf = ChunkBuf::from_ptrs(
            Arc::new(source),
            test_params(),
            1024,
            &[(0, hash), (body.len() as u64, ChunkHash::zero())],
        );

        let mut out = vec![0u8; body.len()];
        assert_eq!(buf.read_at(&mut out, 0).unwrap(), body.len());
        assert_eq!(out, body.to_vec());
    }

    #[test]
    fn test_begin_sync_reports_bodies_once() {
        let mut buf = empty_buf();
        buf.write(b"sync me").unwrap();
        let (chunks, eof) = buf.begin_sync().unwrap();
        assert_eq!(eof, 7);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].body.is_some());
        assert_eq!(chunks[0].hash, ChunkHash::of(b"sync me"));

        buf.finish_sync();
        let (chunks, _) = buf.begin_sync().unwrap();
        assert!(chunks[0].body.is_none(), "clean chunks skip the body");
    }

    #[test]
    fn test_drop_without_sync_is_quiet() {
        let mut buf = empty_buf();
        buf.write(b"doomed bytes").unwrap();
        drop(buf);
    }
}
