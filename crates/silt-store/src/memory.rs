//! In-memory store backed by `BTreeMap` buckets.
//!
//! A transaction clones the bucket map as its private snapshot and applies
//! its own writes to the clone, so in-transaction reads and cursors observe
//! them. Commit swaps the touched buckets back while the single-writer lock
//! is still held, which makes it atomic with respect to every other
//! transaction.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::engine::{Cursor, KeyValue, Store, Tx};
use crate::StoreError;

type Keys = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Clone, Default)]
struct Bucket {
    data: Keys,
    seq: u64,
}

/// In-memory store suitable for tests and lightweight embedding.
#[derive(Clone, Default)]
pub struct MemStore {
    buckets: Arc<RwLock<BTreeMap<String, Bucket>>>,
    write_lock: Arc<Mutex<()>>,
}

impl MemStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.read().values().map(|b| b.data.len()).sum()
    }

    /// Returns whether the store holds no keys at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemStore {
    fn bucket(&self, name: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write();
        if !buckets.contains_key(name) {
            debug!(bucket = name, "created bucket");
            buckets.insert(name.to_string(), Bucket::default());
        }
        Ok(())
    }

    fn begin<'s>(&'s self, writable: bool) -> Result<Box<dyn Tx + 's>, StoreError> {
        let guard = writable.then(|| self.write_lock.lock());
        let snapshot = self.buckets.read().clone();
        Ok(Box::new(MemTx {
            store: self,
            snapshot,
            writable,
            _guard: guard,
        }))
    }
}

struct MemTx<'s> {
    store: &'s MemStore,
    snapshot: BTreeMap<String, Bucket>,
    writable: bool,
    _guard: Option<MutexGuard<'s, ()>>,
}

impl MemTx<'_> {
    fn bucket(&self, name: &str) -> Result<&Bucket, StoreError> {
        self.snapshot
            .get(name)
            .ok_or_else(|| StoreError::BucketNotFound(name.to_string()))
    }

    fn bucket_mut(&mut self, name: &str) -> Result<&mut Bucket, StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }
        self.snapshot
            .get_mut(name)
            .ok_or_else(|| StoreError::BucketNotFound(name.to_string()))
    }
}

impl Tx for MemTx<'_> {
    fn writable(&self) -> bool {
        self.writable
    }

    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.bucket(bucket)?.data.get(key).cloned())
    }

    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.bucket_mut(bucket)?
            .data
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<(), StoreError> {
        self.bucket_mut(bucket)?.data.remove(key);
        Ok(())
    }

    fn next_sequence(&mut self, bucket: &str) -> Result<u64, StoreError> {
        let bucket = self.bucket_mut(bucket)?;
        bucket.seq += 1;
        Ok(bucket.seq)
    }

    fn cursor<'t>(&'t self, bucket: &str) -> Result<Box<dyn Cursor + 't>, StoreError> {
        Ok(Box::new(MemCursor {
            data: &self.bucket(bucket)?.data,
            pos: None,
        }))
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.writable {
            // Merge bucket-wise so buckets created by other handles after
            // this snapshot was taken survive the commit.
            let mut shared = self.store.buckets.write();
            for (name, bucket) in self.snapshot {
                shared.insert(name, bucket);
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemCursor<'t> {
    data: &'t Keys,
    pos: Option<Vec<u8>>,
}

impl MemCursor<'_> {
    fn emit(&mut self, found: Option<(&Vec<u8>, &Vec<u8>)>) -> Option<KeyValue> {
        let (key, value) = found?;
        self.pos = Some(key.clone());
        Some(KeyValue {
            key: key.clone(),
            value: value.clone(),
        })
    }
}

impl Cursor for MemCursor<'_> {
    fn seek(&mut self, key: &[u8]) -> Option<KeyValue> {
        let found = self
            .data
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next();
        self.emit(found)
    }

    fn next(&mut self) -> Option<KeyValue> {
        let pos = self.pos.clone()?;
        let found = self
            .data
            .range::<[u8], _>((Bound::Excluded(pos.as_slice()), Bound::Unbounded))
            .next();
        self.emit(found)
    }
}
