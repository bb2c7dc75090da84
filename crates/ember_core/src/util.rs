//! Filesystem helpers for the engine.

use crate::error::{CoreError, CoreResult};
use std::fs;
use std::path::Path;

/// Returns the total size in bytes of all files under `path`, recursively.
pub(crate) fn dir_size(path: &Path) -> CoreResult<u64> {
    let mut size = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            size += dir_size(&entry.path())?;
        } else {
            size += metadata.len();
        }
    }
    Ok(size)
}

/// Returns the free space in bytes on the volume holding `path`.
pub(crate) fn available_disk_size(path: &Path) -> CoreResult<u64> {
    Ok(fs2::available_space(path)?)
}

/// Copies every entry of `src` into `dst`, skipping names in `exclude`.
pub(crate) fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> CoreResult<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)?;
    }

    let mut items = Vec::new();
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|excluded| name == *excluded) {
            continue;
        }
        items.push(entry.path());
    }

    fs_extra::copy_items(&items, dst, &fs_extra::dir::CopyOptions::new())
        .map_err(|err| CoreError::backup_failed(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dir_size_counts_all_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"12345").unwrap();
        fs::write(dir.path().join("b"), b"123").unwrap();
        assert_eq!(dir_size(dir.path()).unwrap(), 8);
    }

    #[test]
    fn available_disk_size_is_positive() {
        let dir = tempdir().unwrap();
        assert!(available_disk_size(dir.path()).unwrap() > 0);
    }

    #[test]
    fn copy_dir_skips_excluded_names() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        fs::write(src.path().join("keep"), b"data").unwrap();
        fs::write(src.path().join("skip"), b"lock").unwrap();

        let target = dst.path().join("backup");
        copy_dir(src.path(), &target, &["skip"]).unwrap();

        assert!(target.join("keep").exists());
        assert!(!target.join("skip").exists());
    }
}
