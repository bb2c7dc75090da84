//! Compaction: rewrite live records, emit a hint index, swap file sets.
//!
//! A merge rewrites every still-live record from the immutable segments
//! into a sibling `<dir>-merge` directory, accompanied by a hint file that
//! maps each live key to its rewritten position. The merge commits by
//! writing a marker file whose value names the first segment that did not
//! take part; until the marker exists, the merge directory is discarded on
//! the next open.

use crate::config::IndexType;
use crate::data::{
    data_file_path, encode_record_key, parse_record_key, DataFile, LogRecord, NON_TXN_SEQ_NO,
    HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::database::{Database, FILE_LOCK_NAME};
use crate::error::{CoreError, CoreResult};
use crate::util;
use ember_storage::IoKind;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// Suffix of the transient sibling directory used during compaction.
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key of the merge-finished marker record.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Resets the merge-in-progress flag when the merge scope ends.
struct MergingGuard<'a>(&'a Database);

impl Drop for MergingGuard<'_> {
    fn drop(&mut self) {
        self.0.merging.store(false, Ordering::SeqCst);
    }
}

impl Database {
    /// Compacts the immutable segments.
    ///
    /// # Errors
    ///
    /// - [`CoreError::MergeInProgress`] if a merge is already running
    /// - [`CoreError::MergeRatioUnreached`] when too little is reclaimable
    /// - [`CoreError::InsufficientDiskSpace`] when the volume cannot hold
    ///   the rewritten data set
    pub fn merge(&self) -> CoreResult<()> {
        let (merge_file_ids, last_non_merge_file_id, guard) = {
            let mut files = self.files.write();
            if files.active.is_none() {
                return Ok(());
            }

            if self.merging.swap(true, Ordering::SeqCst) {
                return Err(CoreError::MergeInProgress);
            }
            let guard = MergingGuard(self);

            let dir_size = util::dir_size(&self.config.dir_path)?;
            let reclaimable = self.reclaim_size.load(Ordering::SeqCst);
            let ratio = reclaimable as f32 / dir_size as f32;
            if ratio < self.config.data_file_merge_ratio {
                return Err(CoreError::MergeRatioUnreached {
                    ratio,
                    threshold: self.config.data_file_merge_ratio,
                });
            }

            let available = util::available_disk_size(&self.config.dir_path)?;
            let required = dir_size - reclaimable;
            if available < required {
                return Err(CoreError::InsufficientDiskSpace {
                    available,
                    required,
                });
            }

            // Rotate so the merge set is immutable: everything below the
            // fresh active segment takes part in the merge.
            if let Some(active) = files.active.take() {
                active.sync()?;
                let next_id = active.file_id() + 1;
                files.older.insert(active.file_id(), active);
                files.active = Some(DataFile::new(
                    &self.config.dir_path,
                    next_id,
                    IoKind::Standard,
                )?);
            }
            let last_non_merge_file_id = match &files.active {
                Some(active) => active.file_id(),
                None => return Err(CoreError::DataFileNotFound { file_id: 0 }),
            };

            let mut merge_file_ids: Vec<u32> = files.older.keys().copied().collect();
            merge_file_ids.sort_unstable();

            (merge_file_ids, last_non_merge_file_id, guard)
        };

        info!(
            segments = merge_file_ids.len(),
            boundary = last_non_merge_file_id,
            "merge started"
        );

        let merge_path = merge_path(&self.config.dir_path);
        if merge_path.exists() {
            fs::remove_dir_all(&merge_path)?;
        }
        fs::create_dir_all(&merge_path)?;

        let mut merge_config = self.config.clone();
        merge_config.dir_path = merge_path.clone();
        merge_config.sync_writes = false;
        // The scratch engine only needs an append path; an in-memory index
        // keeps the persistent index file out of the merge directory.
        merge_config.index_type = IndexType::BTree;

        let merge_db = Database::open(merge_config)?;
        let hint_file = DataFile::hint_file(&merge_path)?;

        let mut rewritten = 0u64;
        for &file_id in &merge_file_ids {
            // Fresh read-only handles; the segments are immutable.
            let data_file = DataFile::new(&self.config.dir_path, file_id, IoKind::Standard)?;
            let mut offset = 0u64;
            while let Some((record, size)) = data_file.read_log_record(offset)? {
                let (real_key, _) = parse_record_key(&record.key)?;
                // A record is live when the index still points at it.
                let live = self
                    .index
                    .get(&real_key)?
                    .is_some_and(|pos| pos.file_id == file_id && pos.offset == offset);
                if live {
                    // Batch identity is meaningless after the terminator
                    // was replayed; rewrite with a plain key.
                    let rewritten_record = LogRecord {
                        key: encode_record_key(&real_key, NON_TXN_SEQ_NO),
                        value: record.value,
                        rec_type: record.rec_type,
                    };
                    let new_pos = {
                        let mut merge_files = merge_db.files.write();
                        merge_db.append_log_record(&mut merge_files, &rewritten_record)?
                    };
                    hint_file.write_hint_record(real_key, new_pos)?;
                    rewritten += 1;
                }
                offset += size;
            }
        }

        hint_file.sync()?;
        merge_db.sync()?;
        drop(merge_db);

        // The marker is the commit point of the whole merge.
        let finished_file = DataFile::merge_finished_file(&merge_path)?;
        let marker = LogRecord::normal(
            MERGE_FINISHED_KEY.to_vec(),
            last_non_merge_file_id.to_string().into_bytes(),
        );
        let (encoded, _) = marker.encode();
        finished_file.write(&encoded)?;
        finished_file.sync()?;

        info!(records = rewritten, "merge finished");
        drop(guard);
        Ok(())
    }

    /// Loads the index from the hint file, if one exists.
    ///
    /// Hint positions carry no size, so restored entries contribute
    /// nothing to the reclaimable counter until overwritten.
    pub(crate) fn load_index_from_hint_file(&self) -> CoreResult<()> {
        let path = self.config.dir_path.join(HINT_FILE_NAME);
        if !path.exists() {
            return Ok(());
        }

        let hint_file = DataFile::hint_file(&self.config.dir_path)?;
        let mut offset = 0u64;
        while let Some((record, size)) = hint_file.read_log_record(offset)? {
            let pos = crate::data::RecordPosition::decode(&record.value).ok_or_else(|| {
                CoreError::data_directory_corrupted("unreadable hint record")
            })?;
            self.index.put(record.key, pos)?;
            offset += size;
        }
        Ok(())
    }
}

/// Returns the sibling merge directory for a data directory.
fn merge_path(dir_path: &Path) -> PathBuf {
    let dir = dir_path.as_os_str().to_os_string();
    let mut merged = dir;
    merged.push(MERGE_DIR_SUFFIX);
    PathBuf::from(merged)
}

/// Reconciles a previous merge at open, before segment discovery.
///
/// A merge directory without the finished marker is an interrupted merge
/// and is thrown away. A completed one replaces every segment below the
/// recorded boundary. The merge directory is removed either way.
pub(crate) fn load_merge_files(dir_path: &Path) -> CoreResult<()> {
    let merge_path = merge_path(dir_path);
    if !merge_path.exists() {
        return Ok(());
    }

    let result = reconcile_merge_files(dir_path, &merge_path);
    let _ = fs::remove_dir_all(&merge_path);
    result
}

fn reconcile_merge_files(dir_path: &Path, merge_path: &Path) -> CoreResult<()> {
    let mut merge_finished = false;
    let mut merge_file_names = Vec::new();
    for entry in fs::read_dir(merge_path)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == SEQ_NO_FILE_NAME || name == FILE_LOCK_NAME {
            continue;
        }
        if name == MERGE_FINISHED_FILE_NAME {
            merge_finished = true;
        }
        merge_file_names.push(name);
    }

    if !merge_finished {
        warn!("discarding incomplete merge directory");
        return Ok(());
    }

    let boundary = non_merge_file_id(merge_path)?;

    // The rewritten segments supersede everything below the boundary.
    for file_id in 0..boundary {
        let path = data_file_path(dir_path, file_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }

    for name in merge_file_names {
        fs::rename(merge_path.join(&name), dir_path.join(&name))?;
    }

    Ok(())
}

/// Reads the first unmerged segment id from the merge-finished marker.
pub(crate) fn non_merge_file_id(dir_path: &Path) -> CoreResult<u32> {
    let finished_file = DataFile::merge_finished_file(dir_path)?;
    let (record, _) = finished_file
        .read_log_record(0)?
        .ok_or_else(|| CoreError::data_directory_corrupted("empty merge-finished marker"))?;
    std::str::from_utf8(&record.value)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| CoreError::data_directory_corrupted("unreadable merge-finished marker"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_util::{rand_value, test_key};
    use tempfile::tempdir;

    fn merge_config(dir: &Path) -> Config {
        Config::new()
            .dir_path(dir)
            .data_file_size(32 * 1024)
            .data_file_merge_ratio(0.3)
    }

    #[test]
    fn merge_on_empty_database_is_a_no_op() {
        let dir = tempdir().unwrap();
        let db = Database::open(merge_config(dir.path())).unwrap();
        db.merge().unwrap();
        db.close().unwrap();
    }

    #[test]
    fn merge_requires_reclaimable_ratio() {
        let dir = tempdir().unwrap();
        let db = Database::open(merge_config(dir.path())).unwrap();

        // Unique keys only: nothing is reclaimable.
        for i in 0..500 {
            db.put(&test_key(i), &rand_value(64)).unwrap();
        }
        assert!(matches!(
            db.merge(),
            Err(CoreError::MergeRatioUnreached { .. })
        ));
        db.close().unwrap();
    }

    #[test]
    fn merge_rewrites_live_records() {
        let dir = tempdir().unwrap();
        let config = merge_config(dir.path());
        let db = Database::open(config.clone()).unwrap();

        // Every key written twice: half the log is reclaimable.
        for i in 0..1000 {
            db.put(&test_key(i), &rand_value(64)).unwrap();
        }
        for i in 0..1000 {
            db.put(&test_key(i), &rand_value(64)).unwrap();
        }
        let files_before = db.stat().unwrap().data_file_num;

        db.merge().unwrap();

        // The live engine still serves every key.
        for i in 0..1000 {
            assert!(db.get(&test_key(i)).is_ok());
        }
        db.close().unwrap();

        // Reopening swaps in the rewritten segments and the hint file.
        let db = Database::open(config).unwrap();
        assert!(dir.path().join(HINT_FILE_NAME).exists());
        let stat = db.stat().unwrap();
        assert_eq!(stat.key_num, 1000);
        assert!(stat.data_file_num < files_before);
        // Hint-loaded entries carry no size, so nothing is reclaimable
        // until keys are overwritten again.
        assert_eq!(stat.reclaimable_size, 0);
        for i in 0..1000 {
            assert!(db.get(&test_key(i)).is_ok());
        }
        db.close().unwrap();
    }

    #[test]
    fn merge_drops_deleted_keys() {
        let dir = tempdir().unwrap();
        let config = merge_config(dir.path());
        let db = Database::open(config.clone()).unwrap();

        for i in 0..500 {
            db.put(&test_key(i), &rand_value(64)).unwrap();
        }
        for i in 0..250 {
            db.delete(&test_key(i)).unwrap();
        }
        db.merge().unwrap();
        db.close().unwrap();

        let db = Database::open(config).unwrap();
        assert_eq!(db.stat().unwrap().key_num, 250);
        for i in 0..250 {
            assert!(matches!(db.get(&test_key(i)), Err(CoreError::KeyNotFound)));
        }
        for i in 250..500 {
            assert!(db.get(&test_key(i)).is_ok());
        }
        db.close().unwrap();
    }

    #[test]
    fn incomplete_merge_directory_is_discarded() {
        let dir = tempdir().unwrap();
        let config = merge_config(dir.path());

        {
            let db = Database::open(config.clone()).unwrap();
            db.put(b"survivor", b"v").unwrap();
            db.close().unwrap();
        }

        // A merge directory without the finished marker.
        let merge_dir = merge_path(dir.path());
        fs::create_dir_all(&merge_dir).unwrap();
        fs::write(merge_dir.join("000000000.data"), b"partial").unwrap();

        let db = Database::open(config).unwrap();
        assert!(!merge_dir.exists());
        assert_eq!(db.get(b"survivor").unwrap(), b"v");
        db.close().unwrap();
    }

    #[test]
    fn merge_boundary_is_recorded_in_the_marker() {
        let dir = tempdir().unwrap();
        let config = merge_config(dir.path());
        let db = Database::open(config).unwrap();

        for i in 0..500 {
            db.put(&test_key(i), &rand_value(64)).unwrap();
            db.put(&test_key(i), &rand_value(64)).unwrap();
        }
        db.merge().unwrap();

        let merge_dir = merge_path(dir.path());
        let boundary = non_merge_file_id(&merge_dir).unwrap();
        // The boundary names the active segment created by the rotation.
        let active_id = db.files.read().active.as_ref().unwrap().file_id();
        assert_eq!(boundary, active_id);
        db.close().unwrap();
        fs::remove_dir_all(&merge_dir).unwrap();
    }

    #[test]
    fn writes_after_merge_are_kept_across_reopen() {
        let dir = tempdir().unwrap();
        let config = merge_config(dir.path());
        let db = Database::open(config.clone()).unwrap();

        for i in 0..500 {
            db.put(&test_key(i), &rand_value(64)).unwrap();
            db.put(&test_key(i), &rand_value(64)).unwrap();
        }
        db.merge().unwrap();

        // New writes land in the unmerged active segment.
        db.put(b"post-merge", b"fresh").unwrap();
        db.close().unwrap();

        let db = Database::open(config).unwrap();
        assert_eq!(db.get(b"post-merge").unwrap(), b"fresh");
        assert_eq!(db.stat().unwrap().key_num, 501);
        db.close().unwrap();
    }
}
