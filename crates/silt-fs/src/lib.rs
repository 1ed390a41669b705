//! Silt FS - a portable, embeddable userland filesystem.
//!
//! The whole filesystem lives inside an ordered transactional key-value
//! store: the directory tree and inode records as ordered keys in a
//! `nodes` bucket, file contents as content-defined chunks in a
//! content-addressed `chunks` bucket. Paths resolve by descending child
//! pointers from a well-known root node; directory listing and chunk
//! enumeration are prefix scans.
//!
//! Entry point is [`FileSystem`], which exposes the familiar surface:
//! `stat`, `mkdir`, `open_file`, `remove`, and [`File`] handles with
//! `read_at`/`write_at`/`readdir`/`sync`.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod chunkbuf;
pub mod error;
pub mod file;
pub mod fileinfo;
pub mod fs;
pub mod node;
pub mod path;

pub use chunkbuf::{ChunkBuf, ChunkSource};
pub use error::{ErrorKind, PathError};
pub use file::File;
pub use fileinfo::{FileInfo, FileStat};
pub use fs::{FileSystem, FsConfig, FsStats, OpenFlags};
pub use node::{Node, NodeTx, Walk};
pub use path::P;

pub use silt_core::{ChunkHash, FileMode, NIL_NODE_ID, ROOT_NODE_ID};
