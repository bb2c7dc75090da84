//! Prefix-filtered ordered iteration over the database.

use crate::config::IteratorOptions;
use crate::database::Database;
use crate::error::CoreResult;
use crate::index::IndexIterator;

/// An ordered iterator over keys and values.
///
/// Keys come from an index snapshot; values are read from the log on
/// demand under the engine's read lock. When a prefix is configured, every
/// positioning operation skips keys outside the prefix.
pub struct DbIterator<'a> {
    index_iter: Box<dyn IndexIterator>,
    db: &'a Database,
    options: IteratorOptions,
}

impl Database {
    /// Creates an iterator with the given options.
    pub fn iterator(&self, options: IteratorOptions) -> CoreResult<DbIterator<'_>> {
        let index_iter = self.index.iterator(options.reverse)?;
        let mut iter = DbIterator {
            index_iter,
            db: self,
            options,
        };
        iter.skip_to_next();
        Ok(iter)
    }
}

impl DbIterator<'_> {
    /// Moves back to the first matching key.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next();
    }

    /// Positions at the first matching key `>= key` (`<=` when reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_next();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next();
    }

    /// Whether the iterator points at an entry.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// The key at the current position.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Reads the value at the current position from the log.
    pub fn value(&self) -> CoreResult<Vec<u8>> {
        let pos = self.index_iter.value();
        let files = self.db.files.read();
        self.db.value_at_position(&files, pos)
    }

    /// Skips entries whose key does not start with the configured prefix.
    fn skip_to_next(&mut self) {
        let prefix = &self.options.prefix;
        if prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() {
            let key = self.index_iter.key();
            if key.len() >= prefix.len() && &key[..prefix.len()] == prefix.as_slice() {
                break;
            }
            self.index_iter.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    fn open_db(dir: &std::path::Path) -> Database {
        Database::open(Config::new().dir_path(dir)).unwrap()
    }

    fn collect_keys(iter: &mut DbIterator<'_>) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        iter.rewind();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    #[test]
    fn empty_database_iterator() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        let iter = db.iterator(IteratorOptions::default()).unwrap();
        assert!(!iter.valid());
        db.close().unwrap();
    }

    #[test]
    fn forward_and_reverse_order() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        for key in [b"ccde" as &[u8], b"aede", b"bbcd"] {
            db.put(key, b"v").unwrap();
        }

        let mut iter = db.iterator(IteratorOptions::default()).unwrap();
        assert_eq!(
            collect_keys(&mut iter),
            vec![b"aede".to_vec(), b"bbcd".to_vec(), b"ccde".to_vec()]
        );

        let mut iter = db
            .iterator(IteratorOptions {
                prefix: Vec::new(),
                reverse: true,
            })
            .unwrap();
        assert_eq!(
            collect_keys(&mut iter),
            vec![b"ccde".to_vec(), b"bbcd".to_vec(), b"aede".to_vec()]
        );

        db.close().unwrap();
    }

    #[test]
    fn values_come_from_the_log() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        db.put(b"k1", b"v1").unwrap();
        db.put(b"k2", b"v2").unwrap();

        let mut iter = db.iterator(IteratorOptions::default()).unwrap();
        iter.rewind();
        let mut pairs = Vec::new();
        while iter.valid() {
            pairs.push((iter.key().to_vec(), iter.value().unwrap()));
            iter.next();
        }
        assert_eq!(
            pairs,
            vec![
                (b"k1".to_vec(), b"v1".to_vec()),
                (b"k2".to_vec(), b"v2".to_vec())
            ]
        );
        db.close().unwrap();
    }

    #[test]
    fn seek_positions_mid_range() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        for key in [b"aa" as &[u8], b"cc", b"ee"] {
            db.put(key, b"v").unwrap();
        }

        let mut iter = db.iterator(IteratorOptions::default()).unwrap();
        iter.seek(b"bb");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"cc");

        let mut iter = db
            .iterator(IteratorOptions {
                prefix: Vec::new(),
                reverse: true,
            })
            .unwrap();
        iter.seek(b"dd");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"cc");

        db.close().unwrap();
    }

    #[test]
    fn prefix_filter() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        for key in [b"annde" as &[u8], b"aeeue", b"bdhac", b"cndec", b"bnede"] {
            db.put(key, b"v").unwrap();
        }

        let mut iter = db.iterator(IteratorOptions::with_prefix(b"a".to_vec())).unwrap();
        assert_eq!(
            collect_keys(&mut iter),
            vec![b"aeeue".to_vec(), b"annde".to_vec()]
        );

        let mut iter = db
            .iterator(IteratorOptions {
                prefix: b"b".to_vec(),
                reverse: true,
            })
            .unwrap();
        assert_eq!(
            collect_keys(&mut iter),
            vec![b"bnede".to_vec(), b"bdhac".to_vec()]
        );

        db.close().unwrap();
    }
}
