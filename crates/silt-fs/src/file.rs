//! Open-file handles.
//!
//! A [`File`] owns the per-open state: the chunk buffer with its chunker
//! pipeline, and the directory-listing cursor. Reads and writes go through
//! the buffer; nothing touches the store until [`sync`](File::sync), which
//! persists new chunk bodies and rewrites the node's chunk pointers in one
//! transaction. Dropping a handle without sync discards buffered data.

use silt_core::{ChunkHash, FileMode};
use tracing::debug;

use crate::chunkbuf::ChunkBuf;
use crate::error::{ErrorKind, PathError};
use crate::fileinfo::FileInfo;
use crate::fs::{FileSystem, OpenFlags};
use crate::node::{child_ptr_key, decode_node_id, NodeTx};
use crate::path::P;

/// A handle for reading and writing one file, or listing one directory.
///
/// Handles are not safe for concurrent use; two handles open on the same
/// path share the persistent node but have independent buffers, and the
/// last one to sync wins at the chunk-pointer level.
pub struct File<'fs> {
    fs: &'fs FileSystem,
    path: P,
    node_id: u64,
    flags: OpenFlags,
    buf: ChunkBuf,
    /// Child-pointer key of the last entry returned by `readdir`.
    dir_cursor: Option<Vec<u8>>,
}

impl<'fs> File<'fs> {
    pub(crate) fn new(
        fs: &'fs FileSystem,
        path: P,
        node_id: u64,
        flags: OpenFlags,
        buf: ChunkBuf,
    ) -> Self {
        Self {
            fs,
            path,
            node_id,
            flags,
            buf,
            dir_cursor: None,
        }
    }

    /// The path this handle was opened with.
    pub fn path(&self) -> &P {
        &self.path
    }

    /// The identifier of the node backing this handle.
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Current length of the buffered file in bytes.
    pub fn len(&self) -> u64 {
        self.buf.len()
    }

    /// Returns true when the buffered file holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Moves the write position to `pos`, flushing the chunker first.
    pub fn seek(&mut self, pos: u64) -> Result<(), PathError> {
        self.buf.seek(pos).map_err(|e| self.path.err("seek", e))
    }

    /// Writes `data` at the current position and advances it.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, PathError> {
        self.buf.write(data).map_err(|e| self.path.err("write", e))
    }

    /// Writes `data` at `offset`, seeking first when the position differs.
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize, PathError> {
        if offset != self.buf.position() {
            self.seek(offset)?;
        }
        self.write(data)
    }

    /// Reads bytes at `offset` into `out`. Returns the number of bytes
    /// read; 0 means end of file. Chunk bodies not in memory are fetched
    /// from the store by hash.
    pub fn read_at(&mut self, out: &mut [u8], offset: u64) -> Result<usize, PathError> {
        self.buf
            .read_at(out, offset)
            .map_err(|e| self.path.err("read", e))
    }

    /// Reads directory entries.
    ///
    /// With `n > 0`, returns up to `n` entries and remembers where it
    /// stopped; once the directory is exhausted the next call fails with
    /// an `EndOfStream` cause. With `n <= 0`, returns every entry and
    /// resets the cursor.
    pub fn readdir(&mut self, n: i64) -> Result<Vec<FileInfo>, PathError> {
        let wrap = |path: &P, e: ErrorKind| path.err("readdir", e);
        let mut tx = self
            .fs
            .store()
            .begin(false)
            .map_err(|e| wrap(&self.path, e.into()))?;

        let entries = self.scan_dir_tx(&*tx, n)?;
        let mut infos = Vec::with_capacity(entries.len());
        for (name, child_id) in entries {
            let ntx = NodeTx::new(&mut *tx, self.fs.nodes_bucket(), child_id)
                .map_err(|e| wrap(&self.path, e))?;
            let node = ntx
                .get_node()
                .map_err(|e| wrap(&self.path, e))?
                .ok_or_else(|| wrap(&self.path, ErrorKind::NotExist))?;
            infos.push(FileInfo::new(name, node, child_id));
        }
        let _ = tx.rollback();
        Ok(infos)
    }

    /// As [`readdir`](File::readdir), returning names only.
    pub fn readdir_names(&mut self, n: i64) -> Result<Vec<String>, PathError> {
        let wrap = |path: &P, e: ErrorKind| path.err("readdir", e);
        let tx = self
            .fs
            .store()
            .begin(false)
            .map_err(|e| wrap(&self.path, e.into()))?;
        let entries = self.scan_dir_tx(&*tx, n)?;
        let _ = tx.rollback();
        Ok(entries.into_iter().map(|(name, _)| name).collect())
    }

    /// Shared scan for the readdir family: continues from the saved
    /// cursor for paginated calls, restarts for `n <= 0`.
    fn scan_dir_tx(
        &mut self,
        tx: &(dyn silt_store::Tx + '_),
        n: i64,
    ) -> Result<Vec<(String, u64)>, PathError> {
        let wrap = |path: &P, e: ErrorKind| path.err("readdir", e);
        let prefix = child_ptr_key(self.node_id, "");

        let paginated = n > 0;
        let resume = paginated && self.dir_cursor.is_some();
        let start = if paginated {
            self.dir_cursor.clone().unwrap_or_else(|| prefix.clone())
        } else {
            self.dir_cursor = None;
            prefix.clone()
        };

        let mut entries = Vec::new();
        let mut cursor = tx
            .cursor(self.fs.nodes_bucket())
            .map_err(|e| wrap(&self.path, e.into()))?;
        let mut entry = cursor.seek(&start);
        // The saved cursor points at the last returned entry; skip it.
        if resume {
            if let Some(kv) = &entry {
                if kv.key == start {
                    entry = cursor.next();
                }
            }
        }
        while let Some(kv) = entry {
            if !kv.key.starts_with(&prefix) {
                break;
            }
            let name = std::str::from_utf8(&kv.key[prefix.len()..])
                .map_err(|_| wrap(&self.path, ErrorKind::Deserialize))?
                .to_string();
            let child_id = decode_node_id(&kv.value)
                .ok_or_else(|| wrap(&self.path, ErrorKind::Deserialize))?;
            entries.push((name, child_id));
            if paginated {
                self.dir_cursor = Some(kv.key.clone());
                if entries.len() as i64 == n {
                    break;
                }
            }
            entry = cursor.next();
        }

        if paginated && entries.is_empty() {
            return Err(wrap(&self.path, ErrorKind::EndOfStream));
        }
        Ok(entries)
    }

    /// Persists the buffer: stores every new chunk body under its hash,
    /// rewrites the node's chunk pointers including the end-of-file
    /// marker, refreshes the node record, and commits.
    pub fn sync(&mut self) -> Result<(), PathError> {
        if !self.flags.might_write() {
            return Ok(());
        }
        let wrap = |path: &P, e: ErrorKind| path.err("sync", e);
        let (chunks, eof) = self
            .buf
            .begin_sync()
            .map_err(|e| wrap(&self.path, e))?;

        let mut tx = self
            .fs
            .store()
            .begin(true)
            .map_err(|e| wrap(&self.path, e.into()))?;

        let mut stored = 0u64;
        let mut stored_bytes = 0u64;
        for chunk in &chunks {
            if let Some(body) = &chunk.body {
                tx.put(self.fs.chunks_bucket(), chunk.hash.as_slice(), body)
                    .map_err(|e| wrap(&self.path, e.into()))?;
                stored += 1;
                stored_bytes += body.len() as u64;
            }
        }

        let mut ntx = NodeTx::new(&mut *tx, self.fs.nodes_bucket(), self.node_id)
            .map_err(|e| wrap(&self.path, e))?;
        let mode = ntx
            .get_node()
            .map_err(|e| wrap(&self.path, e))?
            .map(|n| n.mode)
            .unwrap_or_else(|| FileMode::file(0o644));
        ntx.clear_chunk_ptrs().map_err(|e| wrap(&self.path, e))?;
        for chunk in &chunks {
            ntx.put_chunk_ptr(chunk.offset, &chunk.hash)
                .map_err(|e| wrap(&self.path, e))?;
        }
        ntx.put_chunk_ptr(eof, &ChunkHash::zero())
            .map_err(|e| wrap(&self.path, e))?;
        ntx.put_node(mode).map_err(|e| wrap(&self.path, e))?;

        tx.commit().map_err(|e| wrap(&self.path, e.into()))?;
        self.buf.finish_sync();

        {
            let mut stats = self.fs.stats_handle().write();
            stats.chunks_stored += stored;
            stats.bytes_stored += stored_bytes;
        }
        debug!(path = %self.path, chunks = chunks.len(), eof, "synced");
        Ok(())
    }

    /// Syncs when the handle is writable, then releases it.
    pub fn close(mut self) -> Result<(), PathError> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::fs::{FsConfig, OpenFlags};
    use crate::path::P;
    use crate::FileSystem;
    use silt_store::MemStore;

    fn open_fs() -> FileSystem {
        FileSystem::open(Arc::new(MemStore::new()), FsConfig::default()).unwrap()
    }

    fn create(fs: &FileSystem, name: &str) {
        fs.open_file(&P::from([name]), OpenFlags::CREATE | OpenFlags::RDWR, 0o644)
            .unwrap()
            .close()
            .unwrap();
    }

    #[test]
    fn test_write_sync_read_back() {
        let fs = open_fs();
        let p = P::from(["data.bin"]);

        let mut file = fs
            .open_file(&p, OpenFlags::CREATE | OpenFlags::RDWR, 0o644)
            .unwrap();
        file.write(b"persisted contents").unwrap();
        file.close().unwrap();

        let mut file = fs.open(&p).unwrap();
        assert_eq!(file.len(), 18);
        let mut out = vec![0u8; 18];
        assert_eq!(file.read_at(&mut out, 0).unwrap(), 18);
        assert_eq!(&out, b"persisted contents");
    }

    #[test]
    fn test_sync_updates_node_size() {
        let fs = open_fs();
        let p = P::from(["sized"]);
        let mut file = fs
            .open_file(&p, OpenFlags::CREATE | OpenFlags::RDWR, 0o644)
            .unwrap();
        file.write(&[0xAB; 1000]).unwrap();
        file.sync().unwrap();

        use crate::fileinfo::FileStat;
        let fi = fs.stat(&p).unwrap();
        assert_eq!(fi.size(), 1000);
    }

    #[test]
    fn test_drop_without_sync_discards() {
        let fs = open_fs();
        let p = P::from(["dropped"]);
        {
            let mut file = fs
                .open_file(&p, OpenFlags::CREATE | OpenFlags::RDWR, 0o644)
                .unwrap();
            file.write(b"never synced").unwrap();
            // Dropped here without sync or close.
        }
        use crate::fileinfo::FileStat;
        let fi = fs.stat(&p).unwrap();
        assert_eq!(fi.size(), 0, "create committed, bytes discarded");
    }

    #[test]
    fn test_readdir_all_orders_by_name() {
        let fs = open_fs();
        create(&fs, "b.txt");
        create(&fs, "a.txt");
        fs.mkdir(&P::from(["bar"]), 0o777).unwrap();

        let mut root = fs.open(&P::root()).unwrap();
        let names = root.readdir_names(0).unwrap();
        assert_eq!(names, vec!["a.txt", "b.txt", "bar"]);
    }

    #[test]
    fn test_readdir_pagination() {
        let fs = open_fs();
        for name in ["a", "b", "c", "d"] {
            create(&fs, name);
        }

        let mut root = fs.open(&P::root()).unwrap();
        let first = root.readdir(2).unwrap();
        assert_eq!(first.len(), 2);
        let second = root.readdir(2).unwrap();
        assert_eq!(second.len(), 2);
        let err = root.readdir(2).unwrap_err();
        assert!(err.is_end_of_stream());

        // A full listing resets the cursor.
        let all = root.readdir(0).unwrap();
        assert_eq!(all.len(), 4);
        let again = root.readdir(2).unwrap();
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn test_readdir_short_tail() {
        let fs = open_fs();
        for name in ["x", "y", "z"] {
            create(&fs, name);
        }
        let mut root = fs.open(&P::root()).unwrap();
        assert_eq!(root.readdir(2).unwrap().len(), 2);
        assert_eq!(root.readdir(2).unwrap().len(), 1, "short final page");
        assert!(root.readdir(2).unwrap_err().is_end_of_stream());
    }

    #[test]
    fn test_readdir_entries_carry_records() {
        use crate::fileinfo::FileStat;
        let fs = open_fs();
        create(&fs, "plain");
        fs.mkdir(&P::from(["sub"]), 0o755).unwrap();

        let mut root = fs.open(&P::root()).unwrap();
        let entries = root.readdir(-1).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name(), "plain");
        assert!(!entries[0].is_dir());
        assert_eq!(entries[1].name(), "sub");
        assert!(entries[1].is_dir());
    }

    #[test]
    fn test_overwrite_middle_via_handle() {
        let fs = open_fs();
        let p = P::from(["patched"]);

        let mut file = fs
            .open_file(&p, OpenFlags::CREATE | OpenFlags::RDWR, 0o644)
            .unwrap();
        file.write(&[0x11; 4096]).unwrap();
        file.write_at(&[0x22; 64], 100).unwrap();
        file.close().unwrap();

        let mut file = fs.open(&p).unwrap();
        let mut out = vec![0u8; 4096];
        assert_eq!(file.read_at(&mut out, 0).unwrap(), 4096);
        assert!(out[..100].iter().all(|&b| b == 0x11));
        assert!(out[100..164].iter().all(|&b| b == 0x22));
        assert!(out[164..].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_append_positions_at_end() {
        let fs = open_fs();
        let p = P::from(["log"]);
        let mut file = fs
            .open_file(&p, OpenFlags::CREATE | OpenFlags::RDWR, 0o644)
            .unwrap();
        file.write(b"first|").unwrap();
        file.close().unwrap();

        let mut file = fs
            .open_file(&p, OpenFlags::RDWR | OpenFlags::APPEND, 0o644)
            .unwrap();
        file.write(b"second").unwrap();
        file.close().unwrap();

        let mut file = fs.open(&p).unwrap();
        let mut out = vec![0u8; 12];
        assert_eq!(file.read_at(&mut out, 0).unwrap(), 12);
        assert_eq!(&out, b"first|second");
    }

    #[test]
    fn test_trunc_discards_contents() {
        let fs = open_fs();
        let p = P::from(["trunc"]);
        let mut file = fs
            .open_file(&p, OpenFlags::CREATE | OpenFlags::RDWR, 0o644)
            .unwrap();
        file.write(b"old contents").unwrap();
        file.close().unwrap();

        let file = fs
            .open_file(&p, OpenFlags::RDWR | OpenFlags::TRUNC, 0o644)
            .unwrap();
        assert_eq!(file.len(), 0);
        file.close().unwrap();

        use crate::fileinfo::FileStat;
        assert_eq!(fs.stat(&p).unwrap().size(), 0);
    }

    #[test]
    fn test_readonly_close_skips_sync() {
        let fs = open_fs();
        create(&fs, "ro");
        let file = fs.open(&P::from(["ro"])).unwrap();
        file.close().unwrap();
    }

    #[test]
    fn test_dedup_identical_bodies() {
        let fs = open_fs();
        for name in ["one", "two"] {
            let mut file = fs
                .open_file(&P::from([name]), OpenFlags::CREATE | OpenFlags::RDWR, 0o644)
                .unwrap();
            file.write(&[0x7A; 2048]).unwrap();
            file.close().unwrap();
        }
        // Same content hashes to the same chunk key, so the second sync
        // rewrote the same bodies rather than new ones.
        let stats = fs.stats();
        assert!(stats.chunks_stored >= 2);
    }
}
