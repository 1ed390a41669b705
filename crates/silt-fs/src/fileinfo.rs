//! File information view.

use chrono::{DateTime, Utc};
use silt_core::FileMode;

use crate::node::Node;

/// Capability contract for anything that can describe a file.
pub trait FileStat {
    /// Base name of the file.
    fn name(&self) -> &str;

    /// Length in bytes for regular files; 8 bytes per entry for
    /// directories.
    fn size(&self) -> i64;

    /// Mode and permission bits.
    fn mode(&self) -> FileMode;

    /// When the file was last modified.
    fn mtime(&self) -> DateTime<Utc>;

    /// Whether the mode describes a directory.
    fn is_dir(&self) -> bool {
        self.mode().is_dir()
    }
}

/// A snapshot of one file's metadata: its base name, the persistent node
/// record, and the node identifier it was read from.
#[derive(Debug, Clone)]
pub struct FileInfo {
    name: String,
    node: Node,
    node_id: u64,
}

impl FileInfo {
    /// Creates a view over a fetched node record.
    pub fn new(name: impl Into<String>, node: Node, node_id: u64) -> Self {
        Self {
            name: name.into(),
            node,
            node_id,
        }
    }

    /// The node identifier backing this view.
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// The underlying node record.
    pub fn node(&self) -> &Node {
        &self.node
    }
}

impl FileStat for FileInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> i64 {
        self.node.size
    }

    fn mode(&self) -> FileMode {
        self.node.mode
    }

    fn mtime(&self) -> DateTime<Utc> {
        self.node.mtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_info_view() {
        let node = Node {
            size: 42,
            mode: FileMode::dir(0o755),
            mtime: Utc::now(),
        };
        let fi = FileInfo::new("docs", node, 7);
        assert_eq!(fi.name(), "docs");
        assert_eq!(fi.size(), 42);
        assert!(fi.is_dir());
        assert_eq!(fi.node_id(), 7);
    }
}
