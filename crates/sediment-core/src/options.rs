//! Configuration surface for opening a [`Database`](../../sediment_storage/struct.Database.html).
//!
//! `Options` follows the builder convention used elsewhere in this
//! codebase's configuration types: a `Default` impl with sane production
//! values, `with_*` setters that take and return `Self`, and a
//! `for_testing` constructor that favors small, deterministic behavior
//! over throughput.

use std::path::PathBuf;

/// Selects the in-memory index backend.
///
/// Only one backend is implemented today; the variant exists so the
/// option surface matches the conceptual API and leaves room for
/// additional backends without a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    /// A self-balancing ordered tree (`BTreeMap`-backed). The only
    /// backend that supports transaction ids and ordered iteration today.
    #[default]
    BTree,
}

/// Options for opening a database directory.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding all segment, hint, and marker files.
    pub dir_path: PathBuf,
    /// Rollover threshold in bytes: once the active segment's size would
    /// reach or exceed this, a new segment is started.
    pub max_file_size: u64,
    /// Force an fsync after every write.
    pub sync_writes: bool,
    /// When `sync_writes` is false, force an fsync once this many bytes
    /// have accumulated since the last sync. Zero disables threshold
    /// syncing (durability then only happens at close or merge).
    pub bytes_per_sync: u64,
    /// Selects the in-memory index backend.
    pub index_type: IndexType,
    /// Use a memory-mapped backend for the recovery scan at open time.
    pub mmap_at_startup: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dir_path: PathBuf::new(),
            max_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
        }
    }
}

impl Options {
    /// Start from defaults with the given directory.
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Options {
            dir_path: dir_path.into(),
            ..Options::default()
        }
    }

    /// Small segments and synchronous writes, so tests see rollover and
    /// durability behavior deterministically without large fixtures.
    pub fn for_testing(dir_path: impl Into<PathBuf>) -> Self {
        Options {
            dir_path: dir_path.into(),
            max_file_size: 64,
            sync_writes: true,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
        }
    }

    /// Set the segment rollover threshold.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Enable or disable fsync-per-write.
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Set the threshold-based sync interval.
    pub fn with_bytes_per_sync(mut self, bytes: u64) -> Self {
        self.bytes_per_sync = bytes;
        self
    }

    /// Select the index backend.
    pub fn with_index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Enable mmap-accelerated recovery scans.
    pub fn with_mmap_at_startup(mut self, mmap_at_startup: bool) -> Self {
        self.mmap_at_startup = mmap_at_startup;
        self
    }
}
