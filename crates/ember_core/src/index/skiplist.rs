//! Ordered in-memory index over a lock-free skip list.

use crate::data::RecordPosition;
use crate::error::CoreResult;
use crate::index::{IndexIterator, Indexer, SnapshotIterator};
use crossbeam_skiplist::SkipMap;

/// Index backed by a `crossbeam_skiplist::SkipMap`.
///
/// Lookups never block each other; the engine's write lock already
/// serializes mutations, so the replace-and-return-old sequence below does
/// not race.
#[derive(Debug, Default)]
pub(crate) struct SkipListIndex {
    map: SkipMap<Vec<u8>, RecordPosition>,
}

impl SkipListIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Indexer for SkipListIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> CoreResult<Option<RecordPosition>> {
        let old = self.map.get(&key).map(|entry| *entry.value());
        self.map.insert(key, pos);
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> CoreResult<Option<RecordPosition>> {
        Ok(self.map.get(key).map(|entry| *entry.value()))
    }

    fn delete(&self, key: &[u8]) -> CoreResult<Option<RecordPosition>> {
        Ok(self.map.remove(key).map(|entry| *entry.value()))
    }

    fn len(&self) -> CoreResult<usize> {
        Ok(self.map.len())
    }

    fn iterator(&self, reverse: bool) -> CoreResult<Box<dyn IndexIterator>> {
        let mut items: Vec<_> = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        if reverse {
            items.reverse();
        }
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn close(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{check_indexer_contract, pos};

    #[test]
    fn skiplist_contract() {
        let index = SkipListIndex::new();
        check_indexer_contract(&index);
    }

    #[test]
    fn put_replaces_in_place() {
        let index = SkipListIndex::new();
        assert!(index.put(b"k".to_vec(), pos(0, 0)).unwrap().is_none());
        let old = index.put(b"k".to_vec(), pos(3, 7)).unwrap().unwrap();
        assert_eq!(old.file_id, 0);
        assert_eq!(index.get(b"k").unwrap().unwrap().file_id, 3);
        assert_eq!(index.len().unwrap(), 1);
    }
}
