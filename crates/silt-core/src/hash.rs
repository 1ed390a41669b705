//! Content-address hash type.
//!
//! Chunks are addressed by the BLAKE3 hash of their bytes. The all-zero
//! hash never occurs for real content and is reserved as the end-of-file
//! tombstone in chunk-pointer keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Size of a content hash in bytes.
pub const HASH_SIZE: usize = 32;

/// 32-byte content address of a chunk: `BLAKE3(bytes)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ChunkHash(pub [u8; HASH_SIZE]);

impl ChunkHash {
    /// Creates a hash from a 32-byte array.
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash, reserved as the end-of-file tombstone.
    pub const fn zero() -> Self {
        Self([0u8; HASH_SIZE])
    }

    /// Returns true if this is the reserved all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_SIZE]
    }

    /// Computes the content address of a chunk body.
    pub fn of(content: &[u8]) -> Self {
        Self(*blake3::hash(content).as_bytes())
    }

    /// Returns the inner bytes.
    pub const fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Returns the inner bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Parses a hash from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_SIZE {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Renders the hash as a hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Reads a hash from a key or value slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HASH_SIZE {
            return None;
        }
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(bytes);
        Some(Self(arr))
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl From<[u8; HASH_SIZE]> for ChunkHash {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<ChunkHash> for [u8; HASH_SIZE] {
    fn from(hash: ChunkHash) -> Self {
        hash.0
    }
}

impl AsRef<[u8]> for ChunkHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
