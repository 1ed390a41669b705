//! Low-level node storage.
//!
//! A node is the on-disk inode. Everything about a node lives under
//! ordered keys in a single bucket, prefixed by its 8-byte big-endian
//! identifier:
//!
//! ```text
//! |       key        |     value      |
//! | 00000001         | { ... }        |  node record (a directory)
//! | 00000001/a.txt   | 00000002       |  child pointer to another node
//! | 00000001/b.txt   | 00000003       |  child pointer to another node
//! | 00000002         | { ... }        |  node record (a file)
//! | 00000002:<0>     | 2511E0F9...AF  |  chunk at file offset 0
//! | 00000002:<len>   | 0000...00      |  zero hash: end-of-file marker
//! ```
//!
//! `/` and `:` keep the three subranges contiguous and non-overlapping, so
//! children enumerate in name order and chunks in offset order with plain
//! prefix scans. Offsets use an order-preserving varint for exactly that
//! reason.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use silt_core::{uvarint_vec, ChunkHash, FileMode, NIL_NODE_ID};
use silt_store::Tx;
use tracing::debug;

use crate::error::ErrorKind;
use crate::path::P;

/// Separator between a node key and a child name.
pub const CHILD_PTR_SEP: u8 = b'/';

/// Separator between a node key and a chunk offset.
pub const CHUNK_PTR_SEP: u8 = b':';

/// The on-disk inode record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node size in bytes.
    #[serde(rename = "s")]
    pub size: i64,
    /// File mode bits.
    #[serde(rename = "m")]
    pub mode: FileMode,
    /// Modification time.
    #[serde(rename = "t")]
    pub mtime: DateTime<Utc>,
}

/// Control flow for pointer scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    /// Keep scanning.
    Continue,
    /// Stop the scan without error.
    Stop,
}

/// Encodes a node identifier as its 8-byte big-endian key.
pub fn node_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Decodes an 8-byte big-endian node identifier.
pub fn decode_node_id(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

/// Builds the child-pointer key `id ‖ '/' ‖ name`. An empty name yields
/// the scan prefix for all of the node's children.
pub fn child_ptr_key(id: u64, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + name.len());
    key.extend_from_slice(&node_key(id));
    key.push(CHILD_PTR_SEP);
    key.extend_from_slice(name.as_bytes());
    key
}

/// Builds the chunk-pointer key `id ‖ ':' ‖ varint(offset)`.
pub fn chunk_ptr_key(id: u64, offset: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(18);
    key.extend_from_slice(&node_key(id));
    key.push(CHUNK_PTR_SEP);
    key.extend_from_slice(&uvarint_vec(offset));
    key
}

/// The scan prefix for a node's chunk pointers.
fn chunk_ptr_prefix(id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.extend_from_slice(&node_key(id));
    key.push(CHUNK_PTR_SEP);
    key
}

/// A node-scoped view over one store transaction.
///
/// All reads and writes go through the transaction handed to `new`, so a
/// caller composing several node interactions inside one operation shares
/// a single atomic commit.
pub struct NodeTx<'a> {
    tx: &'a mut (dyn Tx + 'a),
    bucket: &'a str,
    id: u64,
}

impl<'a> NodeTx<'a> {
    /// Opens a node interaction. An `id` of 0 draws a fresh identifier
    /// from the bucket sequence, which effectively creates a new node.
    pub fn new(tx: &'a mut (dyn Tx + 'a), bucket: &'a str, id: u64) -> Result<Self, ErrorKind> {
        let id = if id == NIL_NODE_ID {
            tx.next_sequence(bucket)?
        } else {
            id
        };
        Ok(Self { tx, bucket, id })
    }

    /// The node identifier this view is scoped to.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Descends through child pointers following `path`, starting at this
    /// node. Returns 0 when any step is missing.
    pub fn descendant_id(&self, path: &P) -> Result<u64, ErrorKind> {
        let mut id = self.id;
        for component in path.components() {
            let key = child_ptr_key(id, component);
            match self.tx.get(self.bucket, &key)? {
                Some(value) => {
                    id = decode_node_id(&value).ok_or(ErrorKind::Deserialize)?;
                }
                None => return Ok(NIL_NODE_ID),
            }
        }
        Ok(id)
    }

    /// Fetches and decodes the node record, or `None` if absent.
    pub fn get_node(&self) -> Result<Option<Node>, ErrorKind> {
        match self.tx.get(self.bucket, &node_key(self.id))? {
            Some(raw) => {
                let node = serde_json::from_slice(&raw).map_err(|_| ErrorKind::Deserialize)?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// Writes a child pointer `name -> child_id` under this node.
    pub fn put_child_ptr(&mut self, name: &str, child_id: u64) -> Result<(), ErrorKind> {
        self.tx
            .put(self.bucket, &child_ptr_key(self.id, name), &node_key(child_id))?;
        Ok(())
    }

    /// Removes the child pointer for `name`, if present.
    pub fn delete_child_ptr(&mut self, name: &str) -> Result<(), ErrorKind> {
        self.tx.delete(self.bucket, &child_ptr_key(self.id, name))?;
        Ok(())
    }

    /// Scans this node's children in name order, invoking `f` for each.
    /// Returning [`Walk::Stop`] ends the scan early without error.
    pub fn get_child_ptrs<F>(&self, mut f: F) -> Result<(), ErrorKind>
    where
        F: FnMut(&str, u64) -> Result<Walk, ErrorKind>,
    {
        let prefix = child_ptr_key(self.id, "");
        let mut cursor = self.tx.cursor(self.bucket)?;
        let mut entry = cursor.seek(&prefix);
        while let Some(kv) = entry {
            if !kv.key.starts_with(&prefix) {
                break;
            }
            let name =
                std::str::from_utf8(&kv.key[prefix.len()..]).map_err(|_| ErrorKind::Deserialize)?;
            let child_id = decode_node_id(&kv.value).ok_or(ErrorKind::Deserialize)?;
            if f(name, child_id)? == Walk::Stop {
                break;
            }
            entry = cursor.next();
        }
        Ok(())
    }

    /// Writes a chunk pointer `offset -> hash` under this node. A zero
    /// hash marks end-of-file and must be the largest offset stored.
    pub fn put_chunk_ptr(&mut self, offset: u64, hash: &ChunkHash) -> Result<(), ErrorKind> {
        self.tx
            .put(self.bucket, &chunk_ptr_key(self.id, offset), hash.as_slice())?;
        Ok(())
    }

    /// Scans this node's chunk pointers in ascending offset order.
    pub fn get_chunk_ptrs<F>(&self, mut f: F) -> Result<(), ErrorKind>
    where
        F: FnMut(u64, ChunkHash) -> Result<Walk, ErrorKind>,
    {
        let prefix = chunk_ptr_prefix(self.id);
        let mut cursor = self.tx.cursor(self.bucket)?;
        let mut entry = cursor.seek(&prefix);
        while let Some(kv) = entry {
            if !kv.key.starts_with(&prefix) {
                break;
            }
            let (offset, _) = silt_core::read_uvarint(&kv.key[prefix.len()..])
                .map_err(|_| ErrorKind::Deserialize)?;
            let hash = ChunkHash::from_slice(&kv.value).ok_or(ErrorKind::Deserialize)?;
            if f(offset, hash)? == Walk::Stop {
                break;
            }
            entry = cursor.next();
        }
        Ok(())
    }

    /// Removes every chunk pointer of this node, leaving the record and
    /// child pointers alone.
    pub fn clear_chunk_ptrs(&mut self) -> Result<(), ErrorKind> {
        let keys = self.collect_keys(&chunk_ptr_prefix(self.id))?;
        for key in keys {
            self.tx.delete(self.bucket, &key)?;
        }
        Ok(())
    }

    /// Completes and (over)writes the node record.
    ///
    /// The size is recomputed from the node's own subrange: directories
    /// count 8 bytes per child, files report the end-of-file marker's
    /// offset, which is the file length. The modification time is stamped
    /// with the current clock.
    pub fn put_node(&mut self, mode: FileMode) -> Result<(u64, Node), ErrorKind> {
        let size = if mode.is_dir() {
            let mut children = 0i64;
            self.get_child_ptrs(|_, _| {
                children += 1;
                Ok(Walk::Continue)
            })?;
            children * 8
        } else {
            let mut eof = 0u64;
            self.get_chunk_ptrs(|offset, hash| {
                if hash.is_zero() {
                    eof = offset;
                }
                Ok(Walk::Continue)
            })?;
            eof as i64
        };

        let node = Node {
            size,
            mode,
            mtime: Utc::now(),
        };
        let raw = serde_json::to_vec(&node).map_err(|_| ErrorKind::Serialize)?;
        self.tx.put(self.bucket, &node_key(self.id), &raw)?;
        debug!(id = self.id, size, mode = %mode, "put node");
        Ok((self.id, node))
    }

    /// Removes the node record and every `id/…` and `id:…` key, all
    /// within the current transaction. Chunk bodies referenced by the
    /// pointers are not touched.
    pub fn delete(&mut self) -> Result<(), ErrorKind> {
        let keys = self.collect_keys(&node_key(self.id))?;
        for key in keys {
            self.tx.delete(self.bucket, &key)?;
        }
        debug!(id = self.id, "deleted node keys");
        Ok(())
    }

    fn collect_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, ErrorKind> {
        let mut keys = Vec::new();
        let mut cursor = self.tx.cursor(self.bucket)?;
        let mut entry = cursor.seek(prefix);
        while let Some(kv) = entry {
            if !kv.key.starts_with(prefix) {
                break;
            }
            keys.push(kv.key);
            entry = cursor.next();
        }
        Ok(keys)
    }
}
