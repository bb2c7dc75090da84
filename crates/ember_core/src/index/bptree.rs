//! Persistent B+-tree index.
//!
//! Entries live in a transactional file inside the data directory and
//! survive restarts, so the engine skips the log replay when this variant
//! is active and restores the batch sequence number from the
//! sequence-number file instead.

use crate::data::RecordPosition;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexIterator, Indexer, SnapshotIterator};
use jammdb::DB;
use std::path::Path;

/// File name of the persistent index inside the data directory.
pub(crate) const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

/// The single bucket holding all entries.
const BUCKET_NAME: &str = "ember-index";

/// Index backed by a [`jammdb`] B+-tree file.
///
/// Mutations run in read-write transactions, lookups in read-only
/// transactions. Positions are stored with the same varint encoding as
/// hint records, so restored entries carry `size = 0`.
pub(crate) struct BPlusTreeIndex {
    tree: DB,
}

impl BPlusTreeIndex {
    /// Opens or creates the index file in `dir_path`.
    pub(crate) fn open(dir_path: &Path) -> CoreResult<Self> {
        let tree = DB::open(dir_path.join(BPTREE_INDEX_FILE_NAME))?;

        let tx = tree.tx(true)?;
        tx.get_or_create_bucket(BUCKET_NAME)?;
        tx.commit()?;

        Ok(Self { tree })
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> CoreResult<Option<RecordPosition>> {
        let tx = self.tree.tx(true)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        let old = bucket
            .put(key, pos.encode())?
            .and_then(|kv| RecordPosition::decode(kv.value()));
        tx.commit()?;
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> CoreResult<Option<RecordPosition>> {
        let tx = self.tree.tx(false)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        Ok(bucket
            .get_kv(key)
            .and_then(|kv| RecordPosition::decode(kv.value())))
    }

    fn delete(&self, key: &[u8]) -> CoreResult<Option<RecordPosition>> {
        let tx = self.tree.tx(true)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        if bucket.get_kv(key).is_none() {
            return Ok(None);
        }
        let old = {
            let kv = bucket.delete(key)?;
            RecordPosition::decode(kv.value())
        };
        tx.commit()?;
        // A stored entry that fails to decode is an invariant breach.
        old.map(Some).ok_or(CoreError::IndexUpdateFailed)
    }

    fn len(&self) -> CoreResult<usize> {
        let tx = self.tree.tx(false)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        Ok(bucket.kv_pairs().count())
    }

    fn iterator(&self, reverse: bool) -> CoreResult<Box<dyn IndexIterator>> {
        // Snapshot the pairs inside one read transaction; the transaction
        // is released before the iterator is handed out.
        let tx = self.tree.tx(false)?;
        let bucket = tx.get_bucket(BUCKET_NAME)?;
        let mut items: Vec<(Vec<u8>, RecordPosition)> = Vec::new();
        for kv in bucket.kv_pairs() {
            if let Some(pos) = RecordPosition::decode(kv.value()) {
                items.push((kv.key().to_vec(), pos));
            }
        }
        if reverse {
            items.reverse();
        }
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn close(&self) -> CoreResult<()> {
        // jammdb flushes committed transactions on drop.
        Ok(())
    }
}
