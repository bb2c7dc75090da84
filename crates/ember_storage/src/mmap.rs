//! Read-only memory-mapped I/O backend.

use crate::backend::IoBackend;
use crate::error::{StorageError, StorageResult};
use memmap2::Mmap;
use std::fs::OpenOptions;
use std::path::Path;

/// A read-only memory-mapped I/O backend.
///
/// This backend maps a file into memory and serves positional reads from
/// the mapping. It exists only to speed up the initial cold read of segment
/// files at engine startup; `append` and `sync` fail loudly, and the engine
/// replaces every mapped file with a [`crate::FileBackend`] before any
/// write-path operation targets it.
#[derive(Debug)]
pub struct MmapBackend {
    // Empty files cannot be mapped; represented as `None`.
    map: Option<Mmap>,
    size: u64,
}

impl MmapBackend {
    /// Opens a read-only mapping of the file at `path`.
    ///
    /// The file is created if it does not exist, matching the standard
    /// backend so that segment discovery behaves the same for both kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();
        let map = if size == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and dropped before the engine
            // reopens this file for writing.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self { map, size })
    }
}

impl IoBackend for MmapBackend {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let len = buf.len();
        let end = offset.saturating_add(len as u64);

        if offset > self.size || end > self.size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.size,
            });
        }

        if len == 0 {
            return Ok(0);
        }

        // `end <= self.size` implies the map exists here.
        let map = self.map.as_ref().ok_or(StorageError::ReadPastEnd {
            offset,
            len,
            size: self.size,
        })?;

        let start = offset as usize;
        buf.copy_from_slice(&map[start..start + len]);
        Ok(len)
    }

    fn append(&self, _data: &[u8]) -> StorageResult<usize> {
        Err(StorageError::ReadOnly { op: "append" })
    }

    fn sync(&self) -> StorageResult<()> {
        Err(StorageError::ReadOnly { op: "sync" })
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileBackend;
    use tempfile::tempdir;

    #[test]
    fn mmap_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.data");

        let file = FileBackend::open(&path).unwrap();
        file.append(b"key-a").unwrap();
        file.append(b"key-b").unwrap();
        file.sync().unwrap();
        drop(file);

        let mmap = MmapBackend::open(&path).unwrap();
        let mut b1 = [0u8; 5];
        assert_eq!(mmap.read_at(&mut b1, 0).unwrap(), 5);
        assert_eq!(&b1, b"key-a");

        let mut b2 = [0u8; 5];
        assert_eq!(mmap.read_at(&mut b2, 5).unwrap(), 5);
        assert_eq!(&b2, b"key-b");
    }

    #[test]
    fn mmap_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.data");

        let mmap = MmapBackend::open(&path).unwrap();
        assert_eq!(mmap.size().unwrap(), 0);

        let mut buf = [0u8; 1];
        assert!(matches!(
            mmap.read_at(&mut buf, 0),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn mmap_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.data");

        let mmap = MmapBackend::open(&path).unwrap();
        assert!(matches!(
            mmap.append(b"x"),
            Err(StorageError::ReadOnly { op: "append" })
        ));
        assert!(matches!(
            mmap.sync(),
            Err(StorageError::ReadOnly { op: "sync" })
        ));
    }

    #[test]
    fn mmap_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sized.data");

        let file = FileBackend::open(&path).unwrap();
        file.append(b"aa").unwrap();
        file.append(b"abc").unwrap();
        file.append(b"ds").unwrap();
        drop(file);

        let mmap = MmapBackend::open(&path).unwrap();
        assert_eq!(mmap.size().unwrap(), 7);
    }
}
