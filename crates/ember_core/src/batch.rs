//! Atomic write batches.
//!
//! A batch buffers puts and deletes in memory and publishes them in one
//! step. Every record of the batch is appended with a shared sequence
//! number and followed by a `TxnFinished` terminator; recovery drops any
//! batch whose terminator never reached the log, so readers either see all
//! of a batch or none of it.

use crate::config::WriteBatchOptions;
use crate::data::{encode_record_key, LogRecord, RecordPosition, RecordType};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::Ordering;

/// Key of the terminator record, sequence-framed like every batch key.
pub(crate) const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// A buffered group of writes committed atomically.
///
/// Writes within a batch are last-write-wins per key and invisible to
/// readers until [`WriteBatch::commit`] returns.
pub struct WriteBatch<'a> {
    options: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
    db: &'a Database,
}

impl Database {
    /// Creates an empty write batch against this database.
    #[must_use]
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch {
            options,
            pending: Mutex::new(HashMap::new()),
            db: self,
        }
    }
}

impl WriteBatch<'_> {
    /// Buffers a put of `value` under `key`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::KeyIsEmpty);
        }

        let mut pending = self.pending.lock();
        pending.insert(
            key.to_vec(),
            LogRecord::normal(key.to_vec(), value.to_vec()),
        );
        Ok(())
    }

    /// Buffers a delete of `key`.
    ///
    /// A key that is neither in the engine's index nor pending in this
    /// batch is a no-op; a key pending only in this batch is simply
    /// un-buffered.
    pub fn delete(&self, key: &[u8]) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::KeyIsEmpty);
        }

        let mut pending = self.pending.lock();
        if self.db.index.get(key)?.is_none() {
            pending.remove(key);
            return Ok(());
        }

        pending.insert(key.to_vec(), LogRecord::tombstone(key.to_vec()));
        Ok(())
    }

    /// Atomically publishes every buffered write.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ExceedMaxBatchSize`] when the batch holds more
    /// records than the configured maximum. Filesystem errors bubble up;
    /// in that case the batch is not published and recovery will drop its
    /// partial records.
    pub fn commit(&self) -> CoreResult<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_size as usize {
            return Err(CoreError::ExceedMaxBatchSize {
                len: pending.len(),
                max: self.options.max_batch_size,
            });
        }

        // Serializes this commit against other commits and plain writes.
        let mut files = self.db.files.write();

        let seq_no = self.db.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<Vec<u8>, RecordPosition> =
            HashMap::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let framed = LogRecord {
                key: encode_record_key(key, seq_no),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            let pos = self.db.append_log_record(&mut files, &framed)?;
            positions.insert(key.clone(), pos);
        }

        // The terminator marks the batch committed on disk.
        let finished = LogRecord {
            key: encode_record_key(TXN_FIN_KEY, seq_no),
            value: Vec::new(),
            rec_type: RecordType::TxnFinished,
        };
        self.db.append_log_record(&mut files, &finished)?;

        if self.options.sync_writes {
            if let Some(active) = &files.active {
                active.sync()?;
            }
        }

        // Publish to the index; only now can readers observe the batch.
        for (key, record) in pending.iter() {
            let pos = positions
                .get(key)
                .copied()
                .ok_or(CoreError::IndexUpdateFailed)?;
            let old = if record.rec_type == RecordType::Normal {
                self.db.index.put(key.clone(), pos)?
            } else {
                self.db
                    .reclaim_size
                    .fetch_add(u64::from(pos.size), Ordering::Relaxed);
                self.db.index.delete(key)?
            };
            if let Some(old) = old {
                self.db
                    .reclaim_size
                    .fetch_add(u64::from(old.size), Ordering::Relaxed);
            }
        }

        pending.clear();
        Ok(())
    }
}
