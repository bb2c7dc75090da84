//! Error types for the Ember storage engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Ember engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O backend error.
    #[error("storage error: {0}")]
    Storage(#[from] ember_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persistent index backend error.
    #[error("index backend error: {0}")]
    IndexBackend(#[from] jammdb::Error),

    /// An empty key was passed to a read or write operation.
    #[error("the key is empty")]
    KeyIsEmpty,

    /// The key is not present, or is shadowed by a tombstone.
    #[error("the key is not found in the database")]
    KeyNotFound,

    /// An index mutation did not return the expected prior entry.
    #[error("failed to update the index")]
    IndexUpdateFailed,

    /// The index points at a segment that is not open.
    #[error("data file {file_id} is not found")]
    DataFileNotFound {
        /// The missing segment id.
        file_id: u32,
    },

    /// A file in the data directory could not be interpreted.
    #[error("the data directory may be corrupted: {message}")]
    DataDirectoryCorrupted {
        /// Description of the problem.
        message: String,
    },

    /// A write batch holds more pending records than allowed.
    #[error("batch of {len} records exceeds the maximum batch size {max}")]
    ExceedMaxBatchSize {
        /// Number of pending records at commit.
        len: usize,
        /// The configured maximum.
        max: u32,
    },

    /// A merge is already running.
    #[error("a merge is already in progress")]
    MergeInProgress,

    /// Not enough reclaimable data to justify a merge.
    #[error("reclaimable ratio {ratio} has not reached the merge threshold {threshold}")]
    MergeRatioUnreached {
        /// Current reclaimable fraction of the directory.
        ratio: f32,
        /// The configured minimum fraction.
        threshold: f32,
    },

    /// The disk cannot hold the merged data set.
    #[error("not enough disk space for merge: {available} available, {required} required")]
    InsufficientDiskSpace {
        /// Available bytes on the volume.
        available: u64,
        /// Bytes the merged data set needs.
        required: u64,
    },

    /// Another process holds the data directory lock.
    #[error("the database directory is used by another process")]
    DatabaseLocked,

    /// A record failed its checksum.
    #[error("invalid crc value, the log record may be corrupted")]
    InvalidRecordCrc,

    /// The sequence-number file could not be parsed.
    #[error("the sequence-number file is corrupted")]
    SeqNoFileCorrupted,

    /// The configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Copying the data directory failed.
    #[error("backup failed: {message}")]
    BackupFailed {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a data directory corruption error.
    pub fn data_directory_corrupted(message: impl Into<String>) -> Self {
        Self::DataDirectoryCorrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a backup failure error.
    pub fn backup_failed(message: impl Into<String>) -> Self {
        Self::BackupFailed {
            message: message.into(),
        }
    }
}
