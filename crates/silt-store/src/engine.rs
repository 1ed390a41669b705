//! Store contract: buckets, transactions, cursors.
//!
//! The traits are object safe so the engine can be threaded through the
//! filesystem as `Arc<dyn Store>` without committing callers to a backend.

use crate::StoreError;

/// An owned key-value pair yielded by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Key bytes, without any backend-internal prefix.
    pub key: Vec<u8>,
    /// Value bytes.
    pub value: Vec<u8>,
}

/// A store of named buckets with transactional access.
///
/// Any number of read-only transactions may run concurrently; at most one
/// writable transaction exists at a time and `begin(true)` blocks until the
/// previous writer finishes. Isolation is snapshot: a transaction observes
/// the state as of `begin` plus its own writes.
pub trait Store: Send + Sync {
    /// Creates the named bucket if it does not exist yet.
    fn bucket(&self, name: &str) -> Result<(), StoreError>;

    /// Begins a transaction. Commit is atomic; dropping without commit
    /// discards all buffered writes.
    fn begin<'s>(&'s self, writable: bool) -> Result<Box<dyn Tx + 's>, StoreError>;
}

/// A single transaction over a [`Store`].
pub trait Tx {
    /// Returns true if mutations are permitted.
    fn writable(&self) -> bool;

    /// Fetches the value stored under `key` in `bucket`.
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Removes `key` if present.
    fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<(), StoreError>;

    /// Draws the next value of the bucket's monotone sequence. The first
    /// call on a fresh bucket returns 1.
    fn next_sequence(&mut self, bucket: &str) -> Result<u64, StoreError>;

    /// Opens a byte-lexicographic cursor over the bucket, positioned
    /// nowhere until the first `seek`.
    fn cursor<'t>(&'t self, bucket: &str) -> Result<Box<dyn Cursor + 't>, StoreError>;

    /// Atomically applies all writes.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards all writes.
    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Ordered iteration over one bucket within a transaction's snapshot.
pub trait Cursor {
    /// Positions at the first pair whose key is `>= key` and returns it.
    fn seek(&mut self, key: &[u8]) -> Option<KeyValue>;

    /// Advances to the next pair in key order.
    fn next(&mut self) -> Option<KeyValue>;
}

/// Scans all pairs whose key starts with `prefix`, in key order.
///
/// The callback returns `true` to continue and `false` to stop early.
pub fn scan_prefix(
    tx: &dyn Tx,
    bucket: &str,
    prefix: &[u8],
    f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, StoreError>,
) -> Result<(), StoreError> {
    let mut cursor = tx.cursor(bucket)?;
    let mut entry = cursor.seek(prefix);
    while let Some(kv) = entry {
        if !kv.key.starts_with(prefix) {
            break;
        }
        if !f(&kv.key, &kv.value)? {
            break;
        }
        entry = cursor.next();
    }
    Ok(())
}
