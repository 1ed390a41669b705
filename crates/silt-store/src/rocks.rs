//! Persistent store backed by RocksDB's `TransactionDB`.
//!
//! Buckets are mapped onto key prefixes rather than column families so
//! that transactional iteration stays on the plain raw-iterator API:
//!
//! ```text
//! 0x00 <bucket>            bucket registry marker
//! 0x01 <bucket>            sequence counter (8 bytes BE)
//! 0x02 <bucket> 0x00 <key> user data
//! ```
//!
//! Bucket names must not contain `0x00`, which keeps the data spaces of
//! distinct buckets disjoint under lexicographic iteration.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rocksdb::{
    DBRawIteratorWithThreadMode, Options, Transaction, TransactionDB, TransactionDBOptions,
};
use tracing::debug;

use crate::engine::{Cursor, KeyValue, Store, Tx};
use crate::StoreError;

const TAG_REGISTRY: u8 = 0x00;
const TAG_SEQUENCE: u8 = 0x01;
const TAG_DATA: u8 = 0x02;
const BUCKET_TERMINATOR: u8 = 0x00;

fn registry_key(bucket: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + bucket.len());
    key.push(TAG_REGISTRY);
    key.extend_from_slice(bucket.as_bytes());
    key
}

fn sequence_key(bucket: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + bucket.len());
    key.push(TAG_SEQUENCE);
    key.extend_from_slice(bucket.as_bytes());
    key
}

fn data_prefix(bucket: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + bucket.len());
    key.push(TAG_DATA);
    key.extend_from_slice(bucket.as_bytes());
    key.push(BUCKET_TERMINATOR);
    key
}

fn data_key(bucket: &str, key: &[u8]) -> Vec<u8> {
    let mut full = data_prefix(bucket);
    full.extend_from_slice(key);
    full
}

fn db_err(err: rocksdb::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Persistent store on a RocksDB `TransactionDB`.
pub struct RocksStore {
    db: TransactionDB,
    buckets: RwLock<HashSet<String>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let txn_db_opts = TransactionDBOptions::default();
        let db = TransactionDB::open(&opts, &txn_db_opts, path).map_err(db_err)?;

        // Reload the bucket registry left by previous runs.
        let mut buckets = HashSet::new();
        {
            let txn = db.transaction();
            let mut iter = txn.raw_iterator();
            iter.seek([TAG_REGISTRY]);
            while iter.valid() {
                let key = iter.key().unwrap_or_default();
                if key.first() != Some(&TAG_REGISTRY) {
                    break;
                }
                if let Ok(name) = std::str::from_utf8(&key[1..]) {
                    buckets.insert(name.to_string());
                }
                iter.next();
            }
        }

        debug!(path = %path.display(), buckets = buckets.len(), "opened rocksdb store");
        Ok(Self {
            db,
            buckets: RwLock::new(buckets),
            write_lock: Mutex::new(()),
        })
    }

    fn check_bucket(&self, name: &str) -> Result<(), StoreError> {
        if self.buckets.read().contains(name) {
            Ok(())
        } else {
            Err(StoreError::BucketNotFound(name.to_string()))
        }
    }
}

impl Store for RocksStore {
    fn bucket(&self, name: &str) -> Result<(), StoreError> {
        if name.is_empty() || name.as_bytes().contains(&BUCKET_TERMINATOR) {
            return Err(StoreError::InvalidBucketName(name.to_string()));
        }
        if self.buckets.read().contains(name) {
            return Ok(());
        }
        self.db.put(registry_key(name), b"").map_err(db_err)?;
        self.buckets.write().insert(name.to_string());
        debug!(bucket = name, "created bucket");
        Ok(())
    }

    fn begin<'s>(&'s self, writable: bool) -> Result<Box<dyn Tx + 's>, StoreError> {
        let guard = writable.then(|| self.write_lock.lock());
        Ok(Box::new(RocksTx {
            store: self,
            txn: self.db.transaction(),
            writable,
            _guard: guard,
        }))
    }
}

struct RocksTx<'s> {
    store: &'s RocksStore,
    txn: Transaction<'s, TransactionDB>,
    writable: bool,
    _guard: Option<MutexGuard<'s, ()>>,
}

impl RocksTx<'_> {
    fn check_writable(&self) -> Result<(), StoreError> {
        if self.writable {
            Ok(())
        } else {
            Err(StoreError::ReadOnly)
        }
    }
}

impl Tx for RocksTx<'_> {
    fn writable(&self) -> bool {
        self.writable
    }

    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.store.check_bucket(bucket)?;
        self.txn.get(data_key(bucket, key)).map_err(db_err)
    }

    fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.store.check_bucket(bucket)?;
        self.txn.put(data_key(bucket, key), value).map_err(db_err)
    }

    fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.store.check_bucket(bucket)?;
        self.txn.delete(data_key(bucket, key)).map_err(db_err)
    }

    fn next_sequence(&mut self, bucket: &str) -> Result<u64, StoreError> {
        self.check_writable()?;
        self.store.check_bucket(bucket)?;
        let key = sequence_key(bucket);
        let current = match self.txn.get(&key).map_err(db_err)? {
            Some(raw) if raw.len() == 8 => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&raw);
                u64::from_be_bytes(arr)
            }
            _ => 0,
        };
        let next = current + 1;
        self.txn.put(&key, next.to_be_bytes()).map_err(db_err)?;
        Ok(next)
    }

    fn cursor<'t>(&'t self, bucket: &str) -> Result<Box<dyn Cursor + 't>, StoreError> {
        self.store.check_bucket(bucket)?;
        Ok(Box::new(RocksCursor {
            iter: self.txn.raw_iterator(),
            prefix: data_prefix(bucket),
        }))
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().map_err(db_err)
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.rollback().map_err(db_err)
    }
}

struct RocksCursor<'t, 'db> {
    iter: DBRawIteratorWithThreadMode<'t, Transaction<'db, TransactionDB>>,
    prefix: Vec<u8>,
}

impl RocksCursor<'_, '_> {
    fn current(&self) -> Option<KeyValue> {
        if !self.iter.valid() {
            return None;
        }
        let key = self.iter.key()?;
        if !key.starts_with(&self.prefix) {
            return None;
        }
        Some(KeyValue {
            key: key[self.prefix.len()..].to_vec(),
            value: self.iter.value()?.to_vec(),
        })
    }
}

impl Cursor for RocksCursor<'_, '_> {
    fn seek(&mut self, key: &[u8]) -> Option<KeyValue> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key);
        self.iter.seek(full);
        self.current()
    }

    fn next(&mut self) -> Option<KeyValue> {
        self.iter.next();
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, RocksStore) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        store.bucket("b").unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_commit() {
        let (_dir, store) = open();
        let mut tx = store.begin(true).unwrap();
        tx.put("b", b"k", b"v").unwrap();
        tx.commit().unwrap();

        let tx = store.begin(false).unwrap();
        assert_eq!(tx.get("b", b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_rollback_discards() {
        let (_dir, store) = open();
        let mut tx = store.begin(true).unwrap();
        tx.put("b", b"k", b"v").unwrap();
        tx.rollback().unwrap();

        let tx = store.begin(false).unwrap();
        assert_eq!(tx.get("b", b"k").unwrap(), None);
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.bucket("b").unwrap();
            let mut tx = store.begin(true).unwrap();
            assert_eq!(tx.next_sequence("b").unwrap(), 1);
            assert_eq!(tx.next_sequence("b").unwrap(), 2);
            tx.commit().unwrap();
        }
        {
            let store = RocksStore::open(dir.path()).unwrap();
            // Registry reloaded, no explicit bucket() call needed.
            let mut tx = store.begin(true).unwrap();
            assert_eq!(tx.next_sequence("b").unwrap(), 3);
            tx.commit().unwrap();
        }
    }

    #[test]
    fn test_cursor_order_and_prefix_isolation() {
        let (_dir, store) = open();
        store.bucket("other").unwrap();
        let mut tx = store.begin(true).unwrap();
        tx.put("b", b"b", b"2").unwrap();
        tx.put("b", b"a", b"1").unwrap();
        tx.put("other", b"c", b"3").unwrap();
        tx.commit().unwrap();

        let tx = store.begin(false).unwrap();
        let mut cursor = tx.cursor("b").unwrap();
        let mut keys = Vec::new();
        let mut entry = cursor.seek(b"");
        while let Some(kv) = entry {
            keys.push(kv.key);
            entry = cursor.next();
        }
        // Only bucket "b" keys, in order.
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_own_writes_visible_in_tx() {
        let (_dir, store) = open();
        let mut tx = store.begin(true).unwrap();
        tx.put("b", b"k", b"v").unwrap();
        assert_eq!(tx.get("b", b"k").unwrap(), Some(b"v".to_vec()));
        let mut cursor = tx.cursor("b").unwrap();
        assert_eq!(cursor.seek(b"k").unwrap().value, b"v".to_vec());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let (_dir, store) = open();
        let mut tx = store.begin(false).unwrap();
        assert!(matches!(tx.put("b", b"k", b"v"), Err(StoreError::ReadOnly)));
    }

    #[test]
    fn test_invalid_bucket_name() {
        let (_dir, store) = open();
        assert!(matches!(
            store.bucket("bad\0name"),
            Err(StoreError::InvalidBucketName(_))
        ));
    }
}
