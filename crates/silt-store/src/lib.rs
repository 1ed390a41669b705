//! Silt Store - ordered transactional key-value storage.
//!
//! Defines the store contract the filesystem engine is written against:
//! named buckets of byte-ordered keys, snapshot-isolated transactions with
//! a single writer, per-bucket sequences, and lexicographic cursors.
//!
//! Two backends are provided:
//! - [`MemStore`]: `BTreeMap` buckets behind a lock, for tests and
//!   lightweight embedding
//! - [`RocksStore`]: persistent storage on RocksDB's `TransactionDB`

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod engine;
pub mod memory;
pub mod rocks;

pub use engine::{Cursor, KeyValue, Store, Tx};
pub use memory::MemStore;
pub use rocks::RocksStore;

use thiserror::Error;

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A bucket was used before being created.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// A bucket name contained a reserved byte.
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    /// A mutation was attempted on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The backing database reported an error.
    #[error("database error: {0}")]
    Database(String),

    /// IO error from the backing database.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
