use crate::path_utils;
use crate::store::INDEX_DIR;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A regular file discovered by the walker.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub abs: PathBuf,
    /// Components relative to the walk root.
    pub parts: Vec<String>,
    pub mtime_ns: i64,
    pub size: u64,
}

/// Deterministically walk `root`, yielding regular files only.
///
/// Symlinks are never followed. With `skip_index_dir`, a `.rededup`
/// directory at the walk root is skipped. Entries are sorted by file name
/// at every level, which makes the overall yield order lexicographic on
/// the null-separated encoded path. Per-entry I/O errors are logged and
/// the walk continues.
pub fn walk_files(root: &Path, skip_index_dir: bool) -> Vec<WalkedFile> {
    let mut out = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(skip_index_dir && e.depth() == 1 && e.file_name() == std::ffi::OsStr::new(INDEX_DIR))
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let md = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "stat failed");
                continue;
            }
        };

        let parts = match path_utils::rel_components(root, entry.path()) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "unindexable path");
                continue;
            }
        };

        out.push(WalkedFile {
            abs: entry.into_path(),
            parts,
            mtime_ns: mtime_ns(&md),
            size: md.len(),
        });
    }

    out
}

pub fn mtime_ns(md: &std::fs::Metadata) -> i64 {
    md.mtime() * 1_000_000_000 + md.mtime_nsec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walk_is_sorted_and_skips_index_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::create_dir(dir.path().join(INDEX_DIR)).unwrap();
        fs::write(dir.path().join("b/c"), b"1").unwrap();
        fs::write(dir.path().join("a"), b"2").unwrap();
        fs::write(dir.path().join(INDEX_DIR).join("db"), b"3").unwrap();

        let files = walk_files(dir.path(), true);
        let rels: Vec<String> = files
            .iter()
            .map(|f| path_utils::join_components(&f.parts))
            .collect();
        assert_eq!(rels, vec!["a", "b/c"]);
    }

    #[test]
    fn walk_ignores_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("real"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

        let files = walk_files(dir.path(), false);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].parts, vec!["real"]);
    }
}
