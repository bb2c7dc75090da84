//! Segment file access.
//!
//! A [`DataFile`] wraps an I/O backend with a write offset and knows how to
//! append encoded records and read them back by position. The same wrapper
//! serves the hint file, the merge-finished marker, and the sequence-number
//! file, which all hold ordinary log records.

use crate::data::record::{
    decode_header, record_crc, LogRecord, RecordPosition, RecordType, MAX_RECORD_HEADER_SIZE,
};
use crate::error::{CoreError, CoreResult};
use ember_storage::{new_io_backend, IoBackend, IoKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Suffix of segment file names.
pub const DATA_FILE_SUFFIX: &str = ".data";
/// Name of the hint index produced by merge.
pub const HINT_FILE_NAME: &str = "hint-index";
/// Name of the merge-finished marker file.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-fin";
/// Name of the sequence-number file written at clean shutdown.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// An append-only segment file.
pub struct DataFile {
    file_id: u32,
    write_off: AtomicU64,
    io: Box<dyn IoBackend>,
}

/// Returns the path of the segment with the given id.
pub(crate) fn data_file_path(dir_path: &Path, file_id: u32) -> PathBuf {
    dir_path.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

impl DataFile {
    /// Opens or creates the segment with the given id.
    pub(crate) fn new(dir_path: &Path, file_id: u32, kind: IoKind) -> CoreResult<Self> {
        let io = new_io_backend(&data_file_path(dir_path, file_id), kind)?;
        Ok(Self {
            file_id,
            write_off: AtomicU64::new(0),
            io,
        })
    }

    /// Opens or creates the hint file in `dir_path`.
    pub(crate) fn hint_file(dir_path: &Path) -> CoreResult<Self> {
        Self::named(dir_path, HINT_FILE_NAME)
    }

    /// Opens or creates the merge-finished marker file in `dir_path`.
    pub(crate) fn merge_finished_file(dir_path: &Path) -> CoreResult<Self> {
        Self::named(dir_path, MERGE_FINISHED_FILE_NAME)
    }

    /// Opens or creates the sequence-number file in `dir_path`.
    pub(crate) fn seq_no_file(dir_path: &Path) -> CoreResult<Self> {
        Self::named(dir_path, SEQ_NO_FILE_NAME)
    }

    fn named(dir_path: &Path, name: &str) -> CoreResult<Self> {
        let io = new_io_backend(&dir_path.join(name), IoKind::Standard)?;
        Ok(Self {
            file_id: 0,
            write_off: AtomicU64::new(0),
            io,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_backend(file_id: u32, io: Box<dyn IoBackend>) -> Self {
        Self {
            file_id,
            write_off: AtomicU64::new(0),
            io,
        }
    }

    /// Returns the segment id.
    pub(crate) fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the offset where the next record will be appended.
    pub(crate) fn write_off(&self) -> u64 {
        self.write_off.load(Ordering::Acquire)
    }

    /// Overrides the append offset; used when recovery replays the tail.
    pub(crate) fn set_write_off(&self, offset: u64) {
        self.write_off.store(offset, Ordering::Release);
    }

    /// Returns the on-disk size of the file.
    pub(crate) fn file_size(&self) -> CoreResult<u64> {
        Ok(self.io.size()?)
    }

    /// Appends raw encoded bytes and advances the write offset.
    pub(crate) fn write(&self, buf: &[u8]) -> CoreResult<usize> {
        let n = self.io.append(buf)?;
        self.write_off.fetch_add(n as u64, Ordering::AcqRel);
        Ok(n)
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns `Ok(None)` when `offset` points at the end of the segment:
    /// past the last byte, into a truncated tail, or at zeroed padding.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRecordCrc`] if the stored checksum does
    /// not match the record content.
    pub(crate) fn read_log_record(&self, offset: u64) -> CoreResult<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // Clip the header read at the end of the file.
        let header_len = (MAX_RECORD_HEADER_SIZE as u64).min(file_size - offset);
        let mut header_buf = vec![0u8; header_len as usize];
        self.io.read_at(&mut header_buf, offset)?;

        let Some((header, header_size)) = decode_header(&header_buf) else {
            return Ok(None);
        };
        if header.crc == 0 && header.key_size == 0 && header.value_size == 0 {
            return Ok(None);
        }

        let rec_type =
            RecordType::from_byte(header.type_byte).ok_or(CoreError::InvalidRecordCrc)?;

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let mut record = LogRecord {
            key: Vec::new(),
            value: Vec::new(),
            rec_type,
        };

        if key_size + value_size > 0 {
            let mut kv_buf = vec![0u8; key_size + value_size];
            self.io.read_at(&mut kv_buf, offset + header_size as u64)?;
            record.value = kv_buf.split_off(key_size);
            record.key = kv_buf;
        }

        if record_crc(&record, &header_buf[4..header_size]) != header.crc {
            return Err(CoreError::InvalidRecordCrc);
        }

        let total = header_size as u64 + key_size as u64 + value_size as u64;
        Ok(Some((record, total)))
    }

    /// Appends a hint record mapping `key` to its rewritten position.
    pub(crate) fn write_hint_record(&self, key: Vec<u8>, pos: RecordPosition) -> CoreResult<()> {
        let record = LogRecord::normal(key, pos.encode());
        let (encoded, _) = record.encode();
        self.write(&encoded)?;
        Ok(())
    }

    /// Syncs appended data to disk.
    pub(crate) fn sync(&self) -> CoreResult<()> {
        self.io.sync()?;
        Ok(())
    }

    /// Replaces the I/O backend; used to downgrade memory-mapped files to
    /// standard I/O after recovery.
    pub(crate) fn set_io_backend(&mut self, dir_path: &Path, kind: IoKind) -> CoreResult<()> {
        self.io = new_io_backend(&data_file_path(dir_path, self.file_id), kind)?;
        Ok(())
    }
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile")
            .field("file_id", &self.file_id)
            .field("write_off", &self.write_off())
            .finish_non_exhaustive()
    }
}
