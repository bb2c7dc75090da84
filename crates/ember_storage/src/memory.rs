//! In-memory I/O backend for testing.

use crate::backend::IoBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory I/O backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Ephemeral stores that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use ember_storage::{InMemoryBackend, IoBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.append(b"test data").unwrap();
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl IoBackend for InMemoryBackend {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let data = self.data.read();
        let size = data.len() as u64;
        let len = buf.len();
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        buf.copy_from_slice(&data[start..end]);
        Ok(len)
    }

    fn append(&self, new_data: &[u8]) -> StorageResult<usize> {
        let mut data = self.data.write();
        data.extend_from_slice(new_data);
        Ok(new_data.len())
    }

    fn sync(&self) -> StorageResult<()> {
        // Nothing to make durable.
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_append_and_read() {
        let backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();
        backend.append(b" world").unwrap();

        let mut buf = [0u8; 11];
        backend.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn memory_read_past_end() {
        let backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(
            backend.read_at(&mut buf, 0),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn memory_with_data() {
        let backend = InMemoryBackend::with_data(vec![1, 2, 3]);
        assert_eq!(backend.size().unwrap(), 3);
        assert_eq!(backend.data(), vec![1, 2, 3]);
    }
}
