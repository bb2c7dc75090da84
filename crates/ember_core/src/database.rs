//! The storage engine: segment lifecycle, reads and writes, recovery.

use crate::config::Config;
use crate::data::{
    encode_record_key, parse_record_key, DataFile, LogRecord, RecordPosition, RecordType,
    DATA_FILE_SUFFIX, SEQ_NO_FILE_NAME,
};
use crate::error::{CoreError, CoreResult};
use crate::index::{new_indexer, Indexer};
use crate::merge;
use crate::stats::Stat;
use crate::util;
use ember_storage::IoKind;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

/// Name of the advisory lock file guarding the data directory.
pub(crate) const FILE_LOCK_NAME: &str = "flock";

/// Key stored in the sequence-number file record.
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// Id assigned to the first segment of a fresh database.
const INITIAL_FILE_ID: u32 = 0;

/// The open segment files.
///
/// Exactly one segment accepts appends; all others are immutable. The
/// engine's read-write lock around this struct is the serialization point
/// for every write.
pub(crate) struct FileSet {
    /// The segment currently accepting appends; `None` until first write
    /// on a fresh database.
    pub(crate) active: Option<DataFile>,
    /// Immutable segments by id.
    pub(crate) older: HashMap<u32, DataFile>,
    /// Bytes appended since the last automatic sync.
    bytes_write: u64,
}

/// A log-structured key-value store.
///
/// All operations take `&self`; the engine is shared across threads behind
/// its own locks. Writes are serialized by an internal read-write lock,
/// reads run concurrently.
///
/// # Example
///
/// ```no_run
/// use ember_core::{Config, Database};
///
/// let db = Database::open(Config::new().dir_path("/tmp/ember")).unwrap();
/// db.put(b"name", b"ember").unwrap();
/// assert_eq!(db.get(b"name").unwrap(), b"ember");
/// db.close().unwrap();
/// ```
pub struct Database {
    pub(crate) config: Config,
    pub(crate) files: RwLock<FileSet>,
    pub(crate) index: Box<dyn Indexer>,
    /// Sequence number of the most recent batch.
    pub(crate) seq_no: AtomicU64,
    /// Set while a merge is running.
    pub(crate) merging: AtomicBool,
    /// Encoded bytes of superseded or tombstoned records.
    pub(crate) reclaim_size: AtomicU64,
    /// Held for the lifetime of the engine; released on drop.
    _lock_file: File,
    /// Whether this open created the data directory.
    is_initial: bool,
}

impl Database {
    /// Opens a database at `config.dir_path`.
    ///
    /// Creates the directory if missing, reconciles any interrupted merge,
    /// opens all segments, and rebuilds the index (or, for the persistent
    /// variant, restores the batch sequence number).
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidConfig`] for a bad configuration
    /// - [`CoreError::DatabaseLocked`] if another process owns the directory
    /// - [`CoreError::DataDirectoryCorrupted`] for unparseable segment names
    /// - [`CoreError::InvalidRecordCrc`] if replay hits a corrupt record
    pub fn open(config: Config) -> CoreResult<Database> {
        config.check()?;

        let mut is_initial = false;
        if !config.dir_path.exists() {
            is_initial = true;
            fs::create_dir_all(&config.dir_path)?;
        } else if fs::read_dir(&config.dir_path)?.next().is_none() {
            is_initial = true;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(config.dir_path.join(FILE_LOCK_NAME))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        merge::load_merge_files(&config.dir_path)?;

        let (files, file_ids) = Self::load_data_files(&config)?;
        let index = new_indexer(config.index_type, &config.dir_path)?;

        let db = Database {
            files: RwLock::new(files),
            index,
            seq_no: AtomicU64::new(0),
            merging: AtomicBool::new(false),
            reclaim_size: AtomicU64::new(0),
            _lock_file: lock_file,
            is_initial,
            config,
        };

        if db.config.index_type.is_persistent() {
            db.load_seq_no()?;
            let files = db.files.read();
            if let Some(active) = &files.active {
                active.set_write_off(active.file_size()?);
            }
        } else {
            db.load_index_from_hint_file()?;
            db.load_index_from_data_files(&file_ids)?;
        }

        if db.config.mmap_at_startup {
            let mut files = db.files.write();
            if let Some(active) = files.active.as_mut() {
                active.set_io_backend(&db.config.dir_path, IoKind::Standard)?;
            }
            for file in files.older.values_mut() {
                file.set_io_backend(&db.config.dir_path, IoKind::Standard)?;
            }
        }

        info!(
            dir = %db.config.dir_path.display(),
            segments = file_ids.len(),
            initial = db.is_initial,
            "database opened"
        );

        Ok(db)
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyIsEmpty`] for an empty key; filesystem
    /// errors bubble up.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::KeyIsEmpty);
        }

        let record = LogRecord::normal(
            encode_record_key(key, crate::data::NON_TXN_SEQ_NO),
            value.to_vec(),
        );

        let mut files = self.files.write();
        let pos = self.append_log_record(&mut files, &record)?;

        if let Some(old) = self.index.put(key.to_vec(), pos)? {
            self.reclaim_size
                .fetch_add(u64::from(old.size), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyNotFound`] when the key is absent or
    /// shadowed by a tombstone.
    pub fn get(&self, key: &[u8]) -> CoreResult<Vec<u8>> {
        if key.is_empty() {
            return Err(CoreError::KeyIsEmpty);
        }

        let files = self.files.read();
        let pos = self.index.get(key)?.ok_or(CoreError::KeyNotFound)?;
        self.value_at_position(&files, pos)
    }

    /// Removes `key`.
    ///
    /// Deleting a key that does not exist succeeds without writing.
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::KeyIsEmpty);
        }

        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let mut files = self.files.write();

        if let Some(old) = self.index.delete(key)? {
            self.reclaim_size
                .fetch_add(u64::from(old.size), Ordering::Relaxed);
        }

        let record = LogRecord::tombstone(encode_record_key(key, crate::data::NON_TXN_SEQ_NO));
        let pos = self.append_log_record(&mut files, &record)?;
        self.reclaim_size
            .fetch_add(u64::from(pos.size), Ordering::Relaxed);
        Ok(())
    }

    /// Returns all keys in ascending order.
    pub fn list_keys(&self) -> CoreResult<Vec<Vec<u8>>> {
        let mut iter = self.index.iterator(false)?;
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        Ok(keys)
    }

    /// Calls `f` for every key-value pair in ascending key order until it
    /// returns `false`.
    pub fn fold<F>(&self, mut f: F) -> CoreResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let files = self.files.read();
        let mut iter = self.index.iterator(false)?;
        while iter.valid() {
            let value = self.value_at_position(&files, iter.value())?;
            if !f(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Returns a statistics snapshot.
    pub fn stat(&self) -> CoreResult<Stat> {
        let files = self.files.write();
        let mut data_file_num = files.older.len();
        if files.active.is_some() {
            data_file_num += 1;
        }
        Ok(Stat {
            key_num: self.index.len()?,
            data_file_num,
            reclaimable_size: self.reclaim_size.load(Ordering::Relaxed),
            disk_size: util::dir_size(&self.config.dir_path)?,
        })
    }

    /// Copies the data directory to `dir`, excluding the lock file.
    pub fn backup(&self, dir: &Path) -> CoreResult<()> {
        let _files = self.files.write();
        util::copy_dir(&self.config.dir_path, dir, &[FILE_LOCK_NAME])
    }

    /// Syncs the active segment to disk.
    pub fn sync(&self) -> CoreResult<()> {
        let files = self.files.write();
        if let Some(active) = &files.active {
            active.sync()?;
        }
        Ok(())
    }

    /// Closes the database.
    ///
    /// Flushes the index, persists the batch sequence number to the
    /// sequence-number file, and syncs the active segment. File handles
    /// and the directory lock release on drop.
    pub fn close(self) -> CoreResult<()> {
        let files = self.files.write();
        if files.active.is_none() {
            return self.index.close();
        }

        self.index.close()?;

        let seq_no_file = DataFile::seq_no_file(&self.config.dir_path)?;
        let record = LogRecord::normal(
            SEQ_NO_KEY.to_vec(),
            self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
        );
        let (encoded, _) = record.encode();
        seq_no_file.write(&encoded)?;
        seq_no_file.sync()?;

        if let Some(active) = &files.active {
            active.sync()?;
        }
        Ok(())
    }

    /// Appends `record` to the active segment, rotating first if it would
    /// overflow. The caller holds the write lock on `files`.
    pub(crate) fn append_log_record(
        &self,
        files: &mut FileSet,
        record: &LogRecord,
    ) -> CoreResult<RecordPosition> {
        let (encoded, size) = record.encode();

        let rotate = match &files.active {
            Some(active) => active.write_off() + size > self.config.data_file_size,
            None => false,
        };
        if rotate {
            if let Some(old) = files.active.take() {
                old.sync()?;
                let next_id = old.file_id() + 1;
                files.older.insert(old.file_id(), old);
                files.active = Some(DataFile::new(
                    &self.config.dir_path,
                    next_id,
                    IoKind::Standard,
                )?);
            }
        } else if files.active.is_none() {
            // Fresh database, or a failed rotation left no active file;
            // never reuse an id already taken by an immutable segment.
            let file_id = files
                .older
                .keys()
                .max()
                .map_or(INITIAL_FILE_ID, |max| max + 1);
            files.active = Some(DataFile::new(
                &self.config.dir_path,
                file_id,
                IoKind::Standard,
            )?);
        }

        let active = files
            .active
            .as_ref()
            .ok_or(CoreError::DataFileNotFound {
                file_id: INITIAL_FILE_ID,
            })?;

        let write_off = active.write_off();
        active.write(&encoded)?;

        files.bytes_write += size;
        let need_sync = self.config.sync_writes
            || (self.config.bytes_per_sync > 0 && files.bytes_write >= self.config.bytes_per_sync);
        if need_sync {
            active.sync()?;
            files.bytes_write = 0;
        }

        Ok(RecordPosition {
            file_id: active.file_id(),
            offset: write_off,
            size: size as u32,
        })
    }

    /// Reads the record at `pos` and returns its value.
    pub(crate) fn value_at_position(
        &self,
        files: &FileSet,
        pos: RecordPosition,
    ) -> CoreResult<Vec<u8>> {
        let file = match &files.active {
            Some(active) if active.file_id() == pos.file_id => active,
            _ => files
                .older
                .get(&pos.file_id)
                .ok_or(CoreError::DataFileNotFound {
                    file_id: pos.file_id,
                })?,
        };

        let (record, _) = file
            .read_log_record(pos.offset)?
            .ok_or(CoreError::KeyNotFound)?;
        if record.rec_type == RecordType::Tombstone {
            return Err(CoreError::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Enumerates, sorts and opens all segment files in the data directory.
    fn load_data_files(config: &Config) -> CoreResult<(FileSet, Vec<u32>)> {
        let mut file_ids = Vec::new();
        for entry in fs::read_dir(&config.dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) {
                let file_id = stem.parse::<u32>().map_err(|_| {
                    CoreError::data_directory_corrupted(format!(
                        "unexpected data file name {name}"
                    ))
                })?;
                file_ids.push(file_id);
            }
        }
        file_ids.sort_unstable();

        let kind = if config.mmap_at_startup {
            IoKind::MemoryMap
        } else {
            IoKind::Standard
        };

        let mut files = FileSet {
            active: None,
            older: HashMap::new(),
            bytes_write: 0,
        };
        for (i, &file_id) in file_ids.iter().enumerate() {
            let data_file = DataFile::new(&config.dir_path, file_id, kind)?;
            if i == file_ids.len() - 1 {
                files.active = Some(data_file);
            } else {
                files.older.insert(file_id, data_file);
            }
        }

        Ok((files, file_ids))
    }

    /// Rebuilds the index by replaying every record past the merge
    /// boundary, buffering batch records until their terminator.
    fn load_index_from_data_files(&self, file_ids: &[u32]) -> CoreResult<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        let mut non_merge_file_id = None;
        if self
            .config
            .dir_path
            .join(crate::data::MERGE_FINISHED_FILE_NAME)
            .exists()
        {
            non_merge_file_id = Some(merge::non_merge_file_id(&self.config.dir_path)?);
        }

        struct PendingRecord {
            key: Vec<u8>,
            rec_type: RecordType,
            pos: RecordPosition,
        }

        let mut pending: HashMap<u64, Vec<PendingRecord>> = HashMap::new();
        let mut current_seq_no = crate::data::NON_TXN_SEQ_NO;

        let files = self.files.read();
        for (i, &file_id) in file_ids.iter().enumerate() {
            // Segments below the merge boundary are covered by the hint file.
            if non_merge_file_id.is_some_and(|boundary| file_id < boundary) {
                continue;
            }

            let file = match &files.active {
                Some(active) if active.file_id() == file_id => active,
                _ => files
                    .older
                    .get(&file_id)
                    .ok_or(CoreError::DataFileNotFound { file_id })?,
            };

            let mut offset = 0u64;
            while let Some((record, size)) = file.read_log_record(offset)? {
                let pos = RecordPosition {
                    file_id,
                    offset,
                    size: size as u32,
                };
                let (real_key, seq_no) = parse_record_key(&record.key)?;

                if record.rec_type == RecordType::TxnFinished {
                    // The batch is now known committed; publish it.
                    if let Some(records) = pending.remove(&seq_no) {
                        for buffered in records {
                            self.update_index_at_recovery(
                                buffered.key,
                                buffered.rec_type,
                                buffered.pos,
                            )?;
                        }
                    }
                } else if seq_no == crate::data::NON_TXN_SEQ_NO {
                    self.update_index_at_recovery(real_key, record.rec_type, pos)?;
                } else {
                    pending.entry(seq_no).or_default().push(PendingRecord {
                        key: real_key,
                        rec_type: record.rec_type,
                        pos,
                    });
                }

                if seq_no > current_seq_no {
                    current_seq_no = seq_no;
                }
                offset += size;
            }

            if i == file_ids.len() - 1 {
                if let Some(active) = &files.active {
                    active.set_write_off(offset);
                }
            }
        }

        // Batches without a terminator crashed before commit and are dropped.
        if !pending.is_empty() {
            warn!(
                batches = pending.len(),
                "discarding uncommitted batches found during recovery"
            );
        }

        self.seq_no.store(current_seq_no, Ordering::SeqCst);
        Ok(())
    }

    /// Applies one replayed record to the index, tracking reclaimable bytes.
    fn update_index_at_recovery(
        &self,
        key: Vec<u8>,
        rec_type: RecordType,
        pos: RecordPosition,
    ) -> CoreResult<()> {
        let old = if rec_type == RecordType::Tombstone {
            self.reclaim_size
                .fetch_add(u64::from(pos.size), Ordering::Relaxed);
            self.index.delete(&key)?
        } else {
            self.index.put(key, pos)?
        };
        if let Some(old) = old {
            self.reclaim_size
                .fetch_add(u64::from(old.size), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Restores the batch sequence number saved at the last clean shutdown,
    /// then removes the marker so a crash cannot replay a stale value.
    fn load_seq_no(&self) -> CoreResult<()> {
        let path = self.config.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.exists() {
            if !self.is_initial {
                warn!("sequence-number file missing; batch sequence restarts at 0");
            }
            return Ok(());
        }

        let seq_no_file = DataFile::seq_no_file(&self.config.dir_path)?;
        if let Some((record, _)) = seq_no_file.read_log_record(0)? {
            let seq_no = std::str::from_utf8(&record.value)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or(CoreError::SeqNoFileCorrupted)?;
            self.seq_no.store(seq_no, Ordering::SeqCst);
        }

        fs::remove_file(path)?;
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir_path", &self.config.dir_path)
            .field("index_type", &self.config.index_type)
            .finish_non_exhaustive()
    }
}
