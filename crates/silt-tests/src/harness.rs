//! Filesystem fixtures over both store backends.

use std::sync::Arc;

use silt_fs::{FileSystem, FsConfig};
use silt_store::{MemStore, RocksStore, Store};
use tempfile::TempDir;

/// Initialize tracing for tests; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("silt_fs=debug,silt_store=debug")
        .with_test_writer()
        .try_init();
}

/// A filesystem plus whatever keeps its backend alive.
pub struct TestFs {
    /// The filesystem under test.
    pub fs: FileSystem,
    /// The shared store, for opening a second filesystem view.
    pub store: Arc<dyn Store>,
    /// Temp directory owning on-disk backends.
    _dir: Option<TempDir>,
}

impl TestFs {
    /// A filesystem over the in-memory store.
    pub fn new_mem() -> Self {
        init_tracing();
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let fs = FileSystem::open(Arc::clone(&store), FsConfig::default()).expect("mount");
        Self {
            fs,
            store,
            _dir: None,
        }
    }

    /// A filesystem over a RocksDB store in a temp directory.
    pub fn new_rocks() -> Self {
        init_tracing();
        let dir = TempDir::new().expect("temp dir");
        let store: Arc<dyn Store> =
            Arc::new(RocksStore::open(dir.path()).expect("open rocksdb"));
        let fs = FileSystem::open(Arc::clone(&store), FsConfig::default()).expect("mount");
        Self {
            fs,
            store,
            _dir: Some(dir),
        }
    }

    /// Reopens the filesystem over the same store, as a fresh mount would.
    pub fn remount(&self) -> FileSystem {
        FileSystem::open(Arc::clone(&self.store), FsConfig::default()).expect("remount")
    }
}
