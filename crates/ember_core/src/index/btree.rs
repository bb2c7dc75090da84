//! Ordered in-memory index over a balanced tree.

use crate::data::RecordPosition;
use crate::error::CoreResult;
use crate::index::{IndexIterator, Indexer, SnapshotIterator};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Index backed by a `BTreeMap` behind a read-write lock.
///
/// This is the default variant: rebuilt from the log at startup, cheap
/// lookups, ordered iteration for prefix scans.
#[derive(Debug, Default)]
pub(crate) struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPosition>>,
}

impl BTreeIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> CoreResult<Option<RecordPosition>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> CoreResult<Option<RecordPosition>> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> CoreResult<Option<RecordPosition>> {
        Ok(self.tree.write().remove(key))
    }

    fn len(&self) -> CoreResult<usize> {
        Ok(self.tree.read().len())
    }

    fn iterator(&self, reverse: bool) -> CoreResult<Box<dyn IndexIterator>> {
        let tree = self.tree.read();
        let items: Vec<_> = if reverse {
            tree.iter().rev().map(|(k, v)| (k.clone(), *v)).collect()
        } else {
            tree.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn close(&self) -> CoreResult<()> {
        Ok(())
    }
}
