//! Filesystem façade.
//!
//! [`FileSystem`] binds an ordered key-value store to a directory tree:
//! node records and pointers live in a `nodes` bucket, chunk bodies in a
//! content-addressed `chunks` bucket. Construction ensures both buckets
//! and a root directory node. Every public operation runs in exactly one
//! store transaction; writability is decided up front and commit errors
//! are surfaced to the caller.

use std::sync::Arc;

use bitflags::bitflags;
use bytes::Bytes;
use parking_lot::RwLock;
use silt_cdc::params::PIPE_CAPACITY;
use silt_cdc::ChunkerParams;
use silt_core::{ChunkHash, FileMode, NIL_NODE_ID, ROOT_NODE_ID};
use silt_store::{Store, StoreError, Tx};
use tracing::{debug, warn};

use crate::chunkbuf::{ChunkBuf, ChunkSource};
use crate::error::{ErrorKind, PathError};
use crate::file::File;
use crate::fileinfo::{FileInfo, FileStat};
use crate::node::{NodeTx, Walk};
use crate::path::P;

bitflags! {
    /// Flags accepted by [`FileSystem::open_file`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open the file write-only.
        const WRONLY = 1 << 0;
        /// Open the file read-write.
        const RDWR = 1 << 1;
        /// Position writes at the end of the file.
        const APPEND = 1 << 2;
        /// Create the file if it does not exist.
        const CREATE = 1 << 3;
        /// With `CREATE`, fail if the file already exists.
        const EXCL = 1 << 4;
        /// Discard existing contents on open.
        const TRUNC = 1 << 5;
    }
}

impl OpenFlags {
    /// Open the file read-only.
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    /// Whether an open with these flags may need a writable transaction.
    pub fn might_write(&self) -> bool {
        self.intersects(
            OpenFlags::WRONLY
                | OpenFlags::RDWR
                | OpenFlags::APPEND
                | OpenFlags::CREATE
                | OpenFlags::TRUNC,
        )
    }
}

/// Filesystem configuration.
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Namespace id; non-empty ids prefix the bucket names so several
    /// filesystems can share one store.
    pub id: String,
    /// Chunk-size bounds for the content-defined chunker.
    pub chunker: ChunkerParams,
    /// Capacity of the byte pipe between writers and the chunker.
    pub pipe_capacity: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            chunker: ChunkerParams::default(),
            pipe_capacity: PIPE_CAPACITY,
        }
    }
}

impl FsConfig {
    /// Creates a configuration with a namespace id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Name of the bucket holding node records and pointers.
    pub fn nodes_bucket(&self) -> String {
        if self.id.is_empty() {
            "nodes".to_string()
        } else {
            format!("{}.nodes", self.id)
        }
    }

    /// Name of the bucket holding chunk bodies.
    pub fn chunks_bucket(&self) -> String {
        if self.id.is_empty() {
            "chunks".to_string()
        } else {
            format!("{}.chunks", self.id)
        }
    }
}

/// Counters kept by the façade.
#[derive(Debug, Default, Clone)]
pub struct FsStats {
    /// Chunk bodies written to the store.
    pub chunks_stored: u64,
    /// Total bytes of chunk bodies written.
    pub bytes_stored: u64,
    /// Chunk bodies fetched for reads and injections.
    pub chunk_fetches: u64,
    /// Fetches that found no body under the hash.
    pub fetch_misses: u64,
}

/// Fetches chunk bodies from the store's content-addressed bucket.
struct StoreChunkSource {
    store: Arc<dyn Store>,
    bucket: String,
    stats: Arc<RwLock<FsStats>>,
}

impl ChunkSource for StoreChunkSource {
    fn fetch(&self, hash: &ChunkHash) -> Result<Bytes, ErrorKind> {
        let tx = self.store.begin(false)?;
        self.stats.write().chunk_fetches += 1;
        match tx.get(&self.bucket, hash.as_slice())? {
            Some(bytes) => Ok(Bytes::from(bytes)),
            None => {
                self.stats.write().fetch_misses += 1;
                warn!(hash = %hash, "chunk body missing");
                Err(ErrorKind::NotExist)
            }
        }
    }
}

/// A filesystem rooted in one store.
pub struct FileSystem {
    store: Arc<dyn Store>,
    config: FsConfig,
    nodes_bucket: String,
    chunks_bucket: String,
    root_id: u64,
    stats: Arc<RwLock<FsStats>>,
}

impl FileSystem {
    /// Opens a filesystem in `store`, creating the buckets and the root
    /// directory node on first use.
    pub fn open(store: Arc<dyn Store>, config: FsConfig) -> Result<Self, PathError> {
        let mount = |cause: ErrorKind| P::root().err("mount", cause);
        let nodes_bucket = config.nodes_bucket();
        let chunks_bucket = config.chunks_bucket();
        store.bucket(&nodes_bucket).map_err(|e| mount(e.into()))?;
        store.bucket(&chunks_bucket).map_err(|e| mount(e.into()))?;

        let mut tx = store.begin(true).map_err(|e| mount(e.into()))?;
        let root = NodeTx::new(&mut *tx, &nodes_bucket, ROOT_NODE_ID).map_err(&mount)?;
        if root.get_node().map_err(&mount)?.is_none() {
            let mut root = NodeTx::new(&mut *tx, &nodes_bucket, NIL_NODE_ID).map_err(&mount)?;
            if root.id() != ROOT_NODE_ID {
                return Err(mount(ErrorKind::Store(StoreError::Database(
                    "nodes bucket has no root but its sequence is in use".to_string(),
                ))));
            }
            root.put_node(FileMode::dir(0o777)).map_err(&mount)?;
            debug!(bucket = %nodes_bucket, "created root node");
        }
        tx.commit().map_err(|e| mount(e.into()))?;

        Ok(Self {
            store,
            config,
            nodes_bucket,
            chunks_bucket,
            root_id: ROOT_NODE_ID,
            stats: Arc::new(RwLock::new(FsStats::default())),
        })
    }

    /// The node identifier of the root directory.
    pub fn root_id(&self) -> u64 {
        self.root_id
    }

    /// A snapshot of the façade's counters.
    pub fn stats(&self) -> FsStats {
        self.stats.read().clone()
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn nodes_bucket(&self) -> &str {
        &self.nodes_bucket
    }

    pub(crate) fn chunks_bucket(&self) -> &str {
        &self.chunks_bucket
    }

    pub(crate) fn stats_handle(&self) -> &Arc<RwLock<FsStats>> {
        &self.stats
    }

    /// Returns file information for the node at `p`.
    pub fn stat(&self, p: &P) -> Result<FileInfo, PathError> {
        p.validate().map_err(|e| p.err("stat", e))?;
        let mut tx = self.store.begin(false).map_err(|e| p.err("stat", e.into()))?;
        self.stat_tx(&mut *tx, p).map_err(|e| p.err("stat", e))
    }

    /// Stat through an enclosing transaction, for multi-step operations.
    pub(crate) fn stat_tx(&self, tx: &mut (dyn Tx + '_), p: &P) -> Result<FileInfo, ErrorKind> {
        let root = NodeTx::new(&mut *tx, &self.nodes_bucket, self.root_id)?;
        let id = root.descendant_id(p)?;
        if id == NIL_NODE_ID {
            return Err(ErrorKind::NotExist);
        }
        let ntx = NodeTx::new(&mut *tx, &self.nodes_bucket, id)?;
        let node = ntx.get_node()?.ok_or(ErrorKind::NotExist)?;
        Ok(FileInfo::new(p.base(), node, id))
    }

    /// Creates the directory `p` with the given permission bits. Creating
    /// an existing directory succeeds without mutation; a file in the way
    /// fails with `Exist`.
    pub fn mkdir(&self, p: &P, perm: u32) -> Result<(), PathError> {
        p.validate().map_err(|e| p.err("mkdir", e))?;
        let mut tx = self
            .store
            .begin(true)
            .map_err(|e| p.err("mkdir", e.into()))?;
        match self.mkdir_tx(&mut *tx, p, perm) {
            Ok(()) => tx.commit().map_err(|e| p.err("mkdir", e.into())),
            Err(err) => {
                let _ = tx.rollback();
                Err(err)
            }
        }
    }

    fn mkdir_tx(&self, tx: &mut (dyn Tx + '_), p: &P, perm: u32) -> Result<(), PathError> {
        // The parent must exist and be a directory; its path is reported
        // on failure so the caller sees which step broke.
        let parent_path = p.parent();
        let parent = self
            .stat_tx(&mut *tx, &parent_path)
            .map_err(|e| parent_path.err("mkdir", e))?;
        if !parent.is_dir() {
            return Err(parent_path.err("mkdir", ErrorKind::NotDirectory));
        }

        match self.stat_tx(&mut *tx, p) {
            Ok(existing) => {
                if existing.is_dir() {
                    Ok(()) // already there, nothing to do
                } else {
                    Err(p.err("mkdir", ErrorKind::Exist))
                }
            }
            Err(ErrorKind::NotExist) => {
                let wrap = |e: ErrorKind| p.err("mkdir", e);
                let mut child =
                    NodeTx::new(&mut *tx, &self.nodes_bucket, NIL_NODE_ID).map_err(wrap)?;
                child.put_node(FileMode::dir(perm)).map_err(wrap)?;
                let child_id = child.id();

                let mut pntx =
                    NodeTx::new(&mut *tx, &self.nodes_bucket, parent.node_id()).map_err(wrap)?;
                pntx.put_child_ptr(p.base(), child_id).map_err(wrap)?;
                pntx.put_node(parent.mode()).map_err(wrap)?;
                debug!(path = %p, id = child_id, "mkdir");
                Ok(())
            }
            Err(err) => Err(p.err("mkdir", err)),
        }
    }

    /// Opens the file at `p` read-only.
    pub fn open(&self, p: &P) -> Result<File<'_>, PathError> {
        self.open_file(p, OpenFlags::RDONLY, 0)
    }

    /// The generalized open call. `flags` select creation, truncation,
    /// exclusivity, and append behavior; `perm` sets the mode of a newly
    /// created file.
    pub fn open_file(&self, p: &P, flags: OpenFlags, perm: u32) -> Result<File<'_>, PathError> {
        p.validate().map_err(|e| p.err("open", e))?;
        let writable = flags.might_write();
        let mut tx = self
            .store
            .begin(writable)
            .map_err(|e| p.err("open", e.into()))?;
        let opened = self.open_tx(&mut *tx, p, flags, perm);
        match &opened {
            Ok(_) if writable => tx.commit().map_err(|e| p.err("open", e.into()))?,
            _ => {
                let _ = tx.rollback();
            }
        }
        let (node_id, ptrs) = opened?;

        let source: Arc<dyn ChunkSource> = Arc::new(StoreChunkSource {
            store: Arc::clone(&self.store),
            bucket: self.chunks_bucket.clone(),
            stats: Arc::clone(&self.stats),
        });
        let buf = ChunkBuf::from_ptrs(source, self.config.chunker, self.config.pipe_capacity, &ptrs);
        let mut file = File::new(self, p.clone(), node_id, flags, buf);
        if flags.contains(OpenFlags::APPEND) {
            file.seek(file.len())?;
        }
        Ok(file)
    }

    #[allow(clippy::type_complexity)]
    fn open_tx(
        &self,
        tx: &mut (dyn Tx + '_),
        p: &P,
        flags: OpenFlags,
        perm: u32,
    ) -> Result<(u64, Vec<(u64, ChunkHash)>), PathError> {
        let wrap = |e: ErrorKind| p.err("open", e);

        let existing = match self.stat_tx(&mut *tx, p) {
            Ok(fi) => Some(fi),
            Err(ErrorKind::NotExist) => None,
            Err(err) => return Err(wrap(err)),
        };

        let node_id = match existing {
            Some(fi) => {
                if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) {
                    return Err(wrap(ErrorKind::Exist));
                }
                if flags.contains(OpenFlags::TRUNC) && !fi.is_dir() {
                    let mut ntx = NodeTx::new(&mut *tx, &self.nodes_bucket, fi.node_id())
                        .map_err(wrap)?;
                    ntx.clear_chunk_ptrs().map_err(wrap)?;
                    ntx.put_chunk_ptr(0, &ChunkHash::zero()).map_err(wrap)?;
                    ntx.put_node(fi.mode()).map_err(wrap)?;
                    debug!(path = %p, id = fi.node_id(), "truncated");
                }
                fi.node_id()
            }
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(wrap(ErrorKind::NotExist));
                }
                // Creating: the parent must exist and be a directory.
                let parent_path = p.parent();
                let parent = self
                    .stat_tx(&mut *tx, &parent_path)
                    .map_err(|e| parent_path.err("open", e))?;
                if !parent.is_dir() {
                    return Err(parent_path.err("open", ErrorKind::NotDirectory));
                }

                let mut child =
                    NodeTx::new(&mut *tx, &self.nodes_bucket, NIL_NODE_ID).map_err(wrap)?;
                // A file node always carries its EOF marker, even empty.
                child.put_chunk_ptr(0, &ChunkHash::zero()).map_err(wrap)?;
                child.put_node(FileMode::file(perm)).map_err(wrap)?;
                let child_id = child.id();

                let mut pntx =
                    NodeTx::new(&mut *tx, &self.nodes_bucket, parent.node_id()).map_err(wrap)?;
                pntx.put_child_ptr(p.base(), child_id).map_err(wrap)?;
                pntx.put_node(parent.mode()).map_err(wrap)?;
                debug!(path = %p, id = child_id, "created file");
                child_id
            }
        };

        let mut ptrs = Vec::new();
        let ntx = NodeTx::new(&mut *tx, &self.nodes_bucket, node_id).map_err(wrap)?;
        ntx.get_chunk_ptrs(|offset, hash| {
            ptrs.push((offset, hash));
            Ok(Walk::Continue)
        })
        .map_err(wrap)?;
        Ok((node_id, ptrs))
    }

    /// Removes the file or empty directory at `p`. The node's record,
    /// child pointers, and chunk pointers are deleted; referenced chunk
    /// bodies stay, they are content-addressed and possibly shared.
    pub fn remove(&self, p: &P) -> Result<(), PathError> {
        p.validate().map_err(|e| p.err("remove", e))?;
        if p.is_root() {
            return Err(p.err("remove", ErrorKind::InvalidPath));
        }
        let mut tx = self
            .store
            .begin(true)
            .map_err(|e| p.err("remove", e.into()))?;
        match self.remove_tx(&mut *tx, p) {
            Ok(()) => tx.commit().map_err(|e| p.err("remove", e.into())),
            Err(err) => {
                let _ = tx.rollback();
                Err(err)
            }
        }
    }

    fn remove_tx(&self, tx: &mut (dyn Tx + '_), p: &P) -> Result<(), PathError> {
        let wrap = |e: ErrorKind| p.err("remove", e);
        let fi = self.stat_tx(&mut *tx, p).map_err(wrap)?;

        if fi.is_dir() {
            // One hit is enough to prove the directory is not empty.
            let mut empty = true;
            let ntx = NodeTx::new(&mut *tx, &self.nodes_bucket, fi.node_id()).map_err(wrap)?;
            ntx.get_child_ptrs(|_, _| {
                empty = false;
                Ok(Walk::Stop)
            })
            .map_err(wrap)?;
            if !empty {
                return Err(wrap(ErrorKind::NotEmptyDirectory));
            }
        }

        let parent_path = p.parent();
        let parent = self.stat_tx(&mut *tx, &parent_path).map_err(wrap)?;
        let mut pntx =
            NodeTx::new(&mut *tx, &self.nodes_bucket, parent.node_id()).map_err(wrap)?;
        pntx.delete_child_ptr(p.base()).map_err(wrap)?;
        pntx.put_node(parent.mode()).map_err(wrap)?;

        let mut ntx = NodeTx::new(&mut *tx, &self.nodes_bucket, fi.node_id()).map_err(wrap)?;
        ntx.delete().map_err(wrap)?;
        debug!(path = %p, id = fi.node_id(), "removed");
        Ok(())
    }
}
