//! Engine configuration.

use crate::error::{CoreError, CoreResult};
use std::path::PathBuf;

/// Selects the in-memory index implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    /// Ordered in-memory tree (`BTreeMap` behind a read-write lock).
    #[default]
    BTree,
    /// Ordered lock-free skip list.
    SkipList,
    /// On-disk B+-tree that survives restarts.
    BPlusTree,
}

impl IndexType {
    /// Whether this variant keeps its entries across restarts.
    ///
    /// Persistent variants skip the log replay at startup and load the
    /// batch sequence number from the sequence-number file instead.
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        matches!(self, Self::BPlusTree)
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory. Required, non-empty.
    pub dir_path: PathBuf,

    /// Segment rotation threshold in bytes. Must be greater than zero.
    pub data_file_size: u64,

    /// Whether to fsync after every append.
    pub sync_writes: bool,

    /// If non-zero and `sync_writes` is off, fsync after this many
    /// cumulative appended bytes.
    pub bytes_per_sync: u64,

    /// The index implementation to use.
    pub index_type: IndexType,

    /// Use read-only memory maps for the initial segment load.
    pub mmap_at_startup: bool,

    /// Minimum reclaimable fraction of the directory required to merge.
    /// Must be within `[0, 1]`.
    pub data_file_merge_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("ember-data"),
            data_file_size: 256 * 1024 * 1024, // 256 MB
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.5,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data directory.
    #[must_use]
    pub fn dir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dir_path = path.into();
        self
    }

    /// Sets the segment rotation threshold.
    #[must_use]
    pub const fn data_file_size(mut self, size: u64) -> Self {
        self.data_file_size = size;
        self
    }

    /// Sets whether to fsync after every append.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the cumulative byte threshold for periodic fsync.
    #[must_use]
    pub const fn bytes_per_sync(mut self, bytes: u64) -> Self {
        self.bytes_per_sync = bytes;
        self
    }

    /// Sets the index implementation.
    #[must_use]
    pub const fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Sets whether the initial segment load uses memory maps.
    #[must_use]
    pub const fn mmap_at_startup(mut self, value: bool) -> Self {
        self.mmap_at_startup = value;
        self
    }

    /// Sets the minimum reclaimable fraction required to merge.
    #[must_use]
    pub const fn data_file_merge_ratio(mut self, ratio: f32) -> Self {
        self.data_file_merge_ratio = ratio;
        self
    }

    /// Validates the configuration.
    pub(crate) fn check(&self) -> CoreResult<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(CoreError::invalid_config(
                "the database directory path cannot be empty",
            ));
        }
        if self.data_file_size == 0 {
            return Err(CoreError::invalid_config(
                "the data file size must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.data_file_merge_ratio) {
            return Err(CoreError::invalid_config(
                "the merge ratio must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`crate::WriteBatch`].
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// Maximum number of pending records a batch may commit.
    pub max_batch_size: u32,

    /// Whether to fsync the active file when the batch commits.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            sync_writes: true,
        }
    }
}

/// Configuration for a [`crate::DbIterator`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys that start with this prefix. Empty matches all keys.
    pub prefix: Vec<u8>,

    /// Iterate in descending key order.
    pub reverse: bool,
}

impl IteratorOptions {
    /// Creates iterator options with the given prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            reverse: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.check().is_ok());
        assert!(!config.sync_writes);
        assert_eq!(config.index_type, IndexType::BTree);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .data_file_size(1024)
            .sync_writes(true)
            .index_type(IndexType::SkipList);

        assert_eq!(config.data_file_size, 1024);
        assert!(config.sync_writes);
        assert_eq!(config.index_type, IndexType::SkipList);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::new().dir_path("").check().is_err());
        assert!(Config::new().data_file_size(0).check().is_err());
        assert!(Config::new().data_file_merge_ratio(1.5).check().is_err());
    }

    #[test]
    fn persistent_variants() {
        assert!(!IndexType::BTree.is_persistent());
        assert!(!IndexType::SkipList.is_persistent());
        assert!(IndexType::BPlusTree.is_persistent());
    }
}
