//! Filesystem error taxonomy.
//!
//! Every public filesystem operation returns a [`PathError`] carrying the
//! operation name, the printable path, and a structured [`ErrorKind`]
//! cause. Causes are preserved rather than flattened so callers can match
//! on them or use the predicate helpers.

use silt_store::StoreError;
use thiserror::Error;

/// The cause of a failed filesystem operation.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A path component contains the reserved separator.
    #[error("invalid path components")]
    InvalidPath,

    /// No node exists at the path.
    #[error("file does not exist")]
    NotExist,

    /// The target exists and exclusive creation was requested, or a file
    /// is in the way of a directory.
    #[error("file already exists")]
    Exist,

    /// A directory was expected but a file was found.
    #[error("not a directory")]
    NotDirectory,

    /// The directory still has entries.
    #[error("directory is not empty")]
    NotEmptyDirectory,

    /// The node record could not be serialized.
    #[error("failed to serialize node record")]
    Serialize,

    /// The node record could not be decoded.
    #[error("failed to deserialize node record")]
    Deserialize,

    /// Directory listing with a positive count reached the end.
    #[error("end of stream")]
    EndOfStream,

    /// The underlying store failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl ErrorKind {
    /// Returns true for the "no node at path" cause.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, ErrorKind::NotExist)
    }

    /// Returns true for the "target already present" cause.
    pub fn is_exist(&self) -> bool {
        matches!(self, ErrorKind::Exist)
    }

    /// Returns true for the "exhausted directory listing" cause.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ErrorKind::EndOfStream)
    }
}

/// A failed filesystem operation: which call, on which path, and why.
#[derive(Debug, Error)]
#[error("{op} {path}: {cause}")]
pub struct PathError {
    /// Operation name, e.g. `"stat"` or `"mkdir"`.
    pub op: &'static str,
    /// Printable form of the path the operation ran against.
    pub path: String,
    /// Structured cause, preserved exactly.
    #[source]
    pub cause: ErrorKind,
}

impl PathError {
    /// Creates a path error.
    pub fn new(op: &'static str, path: String, cause: ErrorKind) -> Self {
        Self { op, path, cause }
    }

    /// Returns the structured cause.
    pub fn kind(&self) -> &ErrorKind {
        &self.cause
    }

    /// Returns true if the cause is "does not exist".
    pub fn is_not_exist(&self) -> bool {
        self.cause.is_not_exist()
    }

    /// Returns true if the cause is "already exists".
    pub fn is_exist(&self) -> bool {
        self.cause.is_exist()
    }

    /// Returns true if the cause is "invalid path".
    pub fn is_invalid_path(&self) -> bool {
        matches!(self.cause, ErrorKind::InvalidPath)
    }

    /// Returns true if the cause is "end of stream".
    pub fn is_end_of_stream(&self) -> bool {
        self.cause.is_end_of_stream()
    }
}
