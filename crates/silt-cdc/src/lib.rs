//! Silt CDC - content-defined chunking.
//!
//! Splits a byte stream into variable-size chunks whose boundaries are
//! chosen by a gear rolling hash over the content itself. Fixed-size
//! chunking shifts every later boundary when bytes are inserted or
//! removed; content-defined boundaries localize the damage, which is what
//! makes chunk-level deduplication and cheap partial rewrites possible.
//!
//! The chunker consumes a bounded blocking [`pipe`], so a writer can push
//! bytes while a dedicated thread pulls chunks out the other end.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod chunker;
mod gear;
pub mod pipe;

pub use chunker::{chunk_slice, Chunker, ChunkerParams};
pub use gear::{gear_table, GearTable, GEAR_TABLE};
pub use pipe::{pipe, PipeReader, PipeWriter};

/// Chunk size parameters.
pub mod params {
    /// Minimum chunk size: 256 KiB.
    pub const CHUNK_MIN_SIZE: usize = 256 * 1024;

    /// Maximum chunk size: 1 MiB.
    pub const CHUNK_MAX_SIZE: usize = 1024 * 1024;

    /// Target average chunk size: 512 KiB (descriptive).
    pub const CHUNK_AVG_SIZE_TARGET: usize = 512 * 1024;

    /// Cut mask for positions before the average (20 bits set).
    pub const MASK_S: u64 = (1 << 20) - 1;

    /// Cut mask for positions at or after the average (18 bits set).
    pub const MASK_L: u64 = (1 << 18) - 1;

    /// Default capacity of the byte pipe feeding a chunker.
    pub const PIPE_CAPACITY: usize = 64 * 1024;
}
