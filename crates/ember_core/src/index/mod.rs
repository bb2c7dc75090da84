//! In-memory key index over record positions.
//!
//! The engine talks to its index through the [`Indexer`] capability set; the
//! concrete structure is chosen per database via
//! [`crate::IndexType`]. In-memory variants rebuild from the log at startup;
//! the persistent B+-tree keeps its entries across restarts, which changes
//! the engine's open path.

mod bptree;
mod btree;
mod skiplist;

use crate::config::IndexType;
use crate::data::RecordPosition;
use crate::error::CoreResult;
use std::path::Path;

/// Ordered map from user key to record position.
pub trait Indexer: Send + Sync {
    /// Stores `pos` under `key`, returning the position it replaced.
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> CoreResult<Option<RecordPosition>>;

    /// Looks up the position stored under `key`.
    fn get(&self, key: &[u8]) -> CoreResult<Option<RecordPosition>>;

    /// Removes `key`, returning the position it held.
    fn delete(&self, key: &[u8]) -> CoreResult<Option<RecordPosition>>;

    /// Returns the number of indexed keys.
    fn len(&self) -> CoreResult<usize>;

    /// Returns true if no keys are indexed.
    fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns an iterator over `(key, position)` pairs in key order.
    fn iterator(&self, reverse: bool) -> CoreResult<Box<dyn IndexIterator>>;

    /// Releases index resources; flushes the persistent variant.
    fn close(&self) -> CoreResult<()>;
}

/// Cursor over index entries in sorted key order.
///
/// Iterators are snapshots: mutations made after construction are not
/// observed. Resources are released on drop.
pub trait IndexIterator: Send {
    /// Moves back to the first entry.
    fn rewind(&mut self);

    /// Positions at the first key `>= key` (`<= key` when reverse).
    fn seek(&mut self, key: &[u8]);

    /// Advances to the next entry.
    fn next(&mut self);

    /// Whether the iterator points at an entry.
    fn valid(&self) -> bool;

    /// The key at the current position.
    ///
    /// Only meaningful while [`IndexIterator::valid`] returns true.
    fn key(&self) -> &[u8];

    /// The position at the current position.
    ///
    /// Only meaningful while [`IndexIterator::valid`] returns true.
    fn value(&self) -> RecordPosition;
}

/// Creates the index for the given variant.
pub(crate) fn new_indexer(
    index_type: IndexType,
    dir_path: &Path,
) -> CoreResult<Box<dyn Indexer>> {
    match index_type {
        IndexType::BTree => Ok(Box::new(btree::BTreeIndex::new())),
        IndexType::SkipList => Ok(Box::new(skiplist::SkipListIndex::new())),
        IndexType::BPlusTree => Ok(Box::new(bptree::BPlusTreeIndex::open(dir_path)?)),
    }
}

/// Shared iterator over a materialized `(key, position)` snapshot.
///
/// All variants snapshot their entries at construction; `seek` is a
/// partition-point search over the sorted pairs.
pub(crate) struct SnapshotIterator {
    items: Vec<(Vec<u8>, RecordPosition)>,
    current: usize,
    reverse: bool,
}

impl SnapshotIterator {
    /// Wraps pairs already sorted ascending (descending when `reverse`).
    pub(crate) fn new(items: Vec<(Vec<u8>, RecordPosition)>, reverse: bool) -> Self {
        Self {
            items,
            current: 0,
            reverse,
        }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.current = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.current += 1;
    }

    fn valid(&self) -> bool {
        self.current < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.current].0
    }

    fn value(&self) -> RecordPosition {
        self.items[self.current].1
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn pos(file_id: u32, offset: u64) -> RecordPosition {
        RecordPosition {
            file_id,
            offset,
            size: 10,
        }
    }

    /// Exercises the full capability set against any variant.
    pub(crate) fn check_indexer_contract(index: &dyn Indexer) {
        assert!(index.is_empty().unwrap());

        assert!(index.put(b"bb".to_vec(), pos(1, 0)).unwrap().is_none());
        assert!(index.put(b"aa".to_vec(), pos(1, 10)).unwrap().is_none());
        assert!(index.put(b"cc".to_vec(), pos(1, 20)).unwrap().is_none());
        assert_eq!(index.len().unwrap(), 3);

        // Replacement returns the prior position.
        let old = index.put(b"bb".to_vec(), pos(2, 0)).unwrap().unwrap();
        assert_eq!(old.file_id, 1);
        assert_eq!(index.len().unwrap(), 3);

        assert_eq!(index.get(b"bb").unwrap().unwrap().file_id, 2);
        assert!(index.get(b"zz").unwrap().is_none());

        // Forward iteration in key order.
        let mut iter = index.iterator(false).unwrap();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);

        // Reverse iteration.
        let mut iter = index.iterator(true).unwrap();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"cc".to_vec(), b"bb".to_vec(), b"aa".to_vec()]);

        // Seek lands on the first key >= target.
        let mut iter = index.iterator(false).unwrap();
        iter.seek(b"ab");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"bb");

        // Reverse seek lands on the first key <= target.
        let mut iter = index.iterator(true).unwrap();
        iter.seek(b"ab");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"aa");

        // Delete returns the prior position.
        let old = index.delete(b"aa").unwrap().unwrap();
        assert_eq!(old.offset, 10);
        assert!(index.delete(b"aa").unwrap().is_none());
        assert_eq!(index.len().unwrap(), 2);
    }

    #[test]
    fn snapshot_iterator_seek_bounds() {
        let items = vec![
            (b"a".to_vec(), pos(0, 0)),
            (b"c".to_vec(), pos(0, 1)),
            (b"e".to_vec(), pos(0, 2)),
        ];
        let mut iter = SnapshotIterator::new(items.clone(), false);
        iter.seek(b"f");
        assert!(!iter.valid());

        iter.rewind();
        iter.seek(b"c");
        assert_eq!(iter.key(), b"c");

        let mut rev: Vec<_> = items;
        rev.reverse();
        let mut iter = SnapshotIterator::new(rev, true);
        iter.seek(b"d");
        assert_eq!(iter.key(), b"c");
        iter.seek(b"0");
        assert!(!iter.valid());
    }
}
