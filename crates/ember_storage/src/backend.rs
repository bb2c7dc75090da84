//! I/O backend trait definition.

use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::mmap::MmapBackend;
use std::path::Path;

/// A low-level I/O backend for Ember segment files.
///
/// Backends are **opaque byte stores**. They provide positional reads and
/// append-only writes against a single file. Ember owns all file format
/// interpretation - backends do not understand records, segments, or hints.
///
/// # Invariants
///
/// - `append` only ever extends the store; existing bytes are never rewritten
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - `sync` ensures all appended data is durable
/// - Backends must be `Send + Sync` for concurrent access
///
/// Backends release their underlying resources on drop.
pub trait IoBackend: Send + Sync {
    /// Reads `buf.len()` bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes read.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size
    /// or an I/O error occurs.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> StorageResult<usize>;

    /// Appends data to the end of the store.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs, or the backend is read-only.
    fn append(&self, data: &[u8]) -> StorageResult<usize>;

    /// Syncs all appended data to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails, or the backend is read-only.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the current size of the store in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;
}

/// Selects the backend flavor used for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoKind {
    /// Buffered positional read and append ([`FileBackend`]).
    #[default]
    Standard,
    /// Read-only memory map ([`MmapBackend`]); writes fail loudly.
    MemoryMap,
}

/// Opens an I/O backend of the requested kind at `path`.
///
/// The file is created if it does not exist.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or mapped.
pub fn new_io_backend(path: &Path, kind: IoKind) -> StorageResult<Box<dyn IoBackend>> {
    match kind {
        IoKind::Standard => Ok(Box::new(FileBackend::open(path)?)),
        IoKind::MemoryMap => Ok(Box::new(MmapBackend::open(path)?)),
    }
}
