//! Source-tree enumeration for the build path.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::ArchiveError;
use crate::fsx;

/// One file selected for archiving. `index` is the slot in the sorted list;
/// the work distributor uses it to collate results back into order.
#[derive(Debug, Clone)]
pub struct FileItem {
    pub index: usize,
    pub path: PathBuf,
    pub rel: String,
    pub mtime: SystemTime,
}

/// Walks `src_dir` and returns the files to archive, sorted by relative
/// name so the archive layout is deterministic given its input.
///
/// Hidden files and directories are skipped unless `include_hidden` (hidden
/// directories prune their whole subtree). The output ZIP itself is excluded
/// in case it lives inside the source tree. Symlinks are not followed.
pub fn list_files(
    src_dir: &Path,
    out_zip: &Path,
    include_hidden: bool,
) -> Result<Vec<FileItem>, ArchiveError> {
    let out_abs = std::path::absolute(out_zip).ok();

    let mut files = Vec::new();
    let walker = WalkDir::new(src_dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || include_hidden || !fsx::is_hidden(e.path()));
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src_dir.to_path_buf());
            let io = e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed"));
            ArchiveError::io(io, path)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let (Ok(abs), Some(out_abs)) = (std::path::absolute(entry.path()), out_abs.as_ref()) {
            if &abs == out_abs {
                continue;
            }
        }
        let rel = entry
            .path()
            .strip_prefix(src_dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let mtime = entry
            .metadata()
            .map_err(|e| {
                ArchiveError::io(
                    e.into_io_error().unwrap_or_else(|| std::io::Error::other("metadata")),
                    entry.path(),
                )
            })?
            .modified()
            .map_err(|e| ArchiveError::io(e, entry.path()))?;
        files.push(FileItem { index: 0, path: entry.path().to_path_buf(), rel, mtime });
    }

    files.sort_by(|a, b| a.rel.cmp(&b.rel));
    for (i, item) in files.iter_mut().enumerate() {
        item.index = i;
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lists_sorted_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("sub/a.txt"), b"a").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let items = list_files(dir.path(), &dir.path().join("out.zip"), false).unwrap();
        let rels: Vec<&str> = items.iter().map(|i| i.rel.as_str()).collect();
        assert_eq!(rels, ["a.txt", "b.txt", "sub/a.txt"]);
        assert_eq!(items[2].index, 2);
    }

    #[test]
    fn skips_hidden_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("seen.txt"), b"x").unwrap();
        fs::write(dir.path().join(".hidden"), b"x").unwrap();
        fs::create_dir(dir.path().join(".secrets")).unwrap();
        fs::write(dir.path().join(".secrets/inner.txt"), b"x").unwrap();

        let items = list_files(dir.path(), &dir.path().join("out.zip"), false).unwrap();
        let rels: Vec<&str> = items.iter().map(|i| i.rel.as_str()).collect();
        assert_eq!(rels, ["seen.txt"]);

        let all = list_files(dir.path(), &dir.path().join("out.zip"), true).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn excludes_the_output_zip_itself() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("tree.zip");
        fs::write(dir.path().join("keep.txt"), b"x").unwrap();
        fs::write(&out, b"not really a zip").unwrap();

        let items = list_files(dir.path(), &out, false).unwrap();
        let rels: Vec<&str> = items.iter().map(|i| i.rel.as_str()).collect();
        assert_eq!(rels, ["keep.txt"]);
    }
}
