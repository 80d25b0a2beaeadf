// src/core/paths.rs

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Finds the challenge launch script: `run*.sh` first, then `start*.sh`.
pub fn find_runfile(dir: &Path) -> Option<PathBuf> {
    find_match(dir, |name| name.starts_with("run") && name.ends_with(".sh"))
        .or_else(|| find_match(dir, |name| name.starts_with("start") && name.ends_with(".sh")))
}

/// Finds a compressed kernel image by its conventional name.
pub fn find_kernel(dir: &Path) -> Option<PathBuf> {
    find_match(dir, |name| name == "bzImage")
}

/// Finds an initial ramdisk archive, preferring an uncompressed one.
pub fn find_cpio(dir: &Path) -> Option<PathBuf> {
    find_match(dir, |name| name.ends_with(".cpio"))
        .or_else(|| find_match(dir, |name| name.ends_with(".cpio.gz")))
}

/// Finds an already extracted kernel module.
pub fn find_module(dir: &Path) -> Option<PathBuf> {
    find_match(dir, |name| name.ends_with(".ko"))
}

/// Returns the lexicographically first regular file in `dir` whose name
/// satisfies the predicate. Sorted so repeated runs pick the same file.
fn find_match(dir: &Path, matches: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let mut hits: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(&matches))
        .map(walkdir::DirEntry::into_path)
        .collect();
    hits.sort();
    hits.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_runfile_prefers_run_over_start() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "start-vm.sh");
        touch(tmp.path(), "run.sh");
        let found = find_runfile(tmp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "run.sh");
    }

    #[test]
    fn test_runfile_falls_back_to_start() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "start.sh");
        let found = find_runfile(tmp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "start.sh");
    }

    #[test]
    fn test_cpio_prefers_plain_over_gzipped() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "rootfs.cpio.gz");
        touch(tmp.path(), "rootfs.cpio");
        let found = find_cpio(tmp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "rootfs.cpio");
    }

    #[test]
    fn test_kernel_is_matched_exactly() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "bzImage.bak");
        assert!(find_kernel(tmp.path()).is_none());
        touch(tmp.path(), "bzImage");
        assert!(find_kernel(tmp.path()).is_some());
    }

    #[test]
    fn test_no_match_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find_runfile(tmp.path()).is_none());
        assert!(find_module(tmp.path()).is_none());
    }
}
