//! Source file discovery.
//!
//! Turns the CLI's sources (files, directories, a saved file list) into
//! the ordered, absolute, duplicate-free path list the orchestrator
//! consumes. Directories walk depth-first in name order so repeated runs
//! see the same sequence. Symlinks and special files are left out;
//! sources that do not exist are passed through so the operation can
//! report the skip instead of silently dropping them.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::pathmap::normalize_lexical;
use crate::error::{PreserveError, Result};

/// Expand `sources` into concrete file paths.
///
/// A file source is taken as-is; a directory source contributes its
/// regular files, the whole subtree when `recursive` is set.
pub fn discover_files(sources: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for source in sources {
        let path = absolutize(source);
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_dir() => walk_into(&path, recursive, &mut out),
            Ok(_) => out.push(path),
            Err(_) => {
                warn!(source = %path.display(), "Source does not exist");
                out.push(path);
            }
        }
    }
    dedup(out)
}

/// Combine direct sources and an optional saved list into one ordered,
/// duplicate-free selection.
pub fn gather(
    sources: &[PathBuf],
    file_list: Option<&Path>,
    recursive: bool,
) -> Result<Vec<PathBuf>> {
    let mut files = discover_files(sources, recursive);
    if let Some(list) = file_list {
        files.extend(load_file_list(list)?);
    }
    Ok(dedup(files))
}

/// Load a newline-delimited file list. Blank lines and `#` comments are
/// ignored; relative entries resolve against the current directory.
pub fn load_file_list(path: &Path) -> Result<Vec<PathBuf>> {
    let content = fs::read_to_string(path).map_err(|e| PreserveError::io(path, e))?;
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        out.push(absolutize(Path::new(line)));
    }
    Ok(dedup(out))
}

fn walk_into(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read directory");
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();

    for path in paths {
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            debug!(path = %path.display(), "Skipping symlink");
        } else if file_type.is_file() {
            out.push(path);
        } else if file_type.is_dir() && recursive {
            walk_into(&path, recursive, out);
        }
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize_lexical(path);
    }
    match env::current_dir() {
        Ok(cwd) => normalize_lexical(&cwd.join(path)),
        Err(e) => {
            warn!(error = %e, "Cannot resolve current directory");
            path.to_path_buf()
        }
    }
}

fn dedup(files: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    files.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_file(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn recursive_walk_is_depth_first_and_sorted() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        create_file(&src.join("b.txt"));
        create_file(&src.join("a.txt"));
        create_file(&src.join("sub/c.txt"));

        let files = discover_files(&[src.clone()], true);
        assert_eq!(
            files,
            vec![src.join("a.txt"), src.join("b.txt"), src.join("sub/c.txt")]
        );
    }

    #[test]
    fn non_recursive_takes_only_immediate_files() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        create_file(&src.join("a.txt"));
        create_file(&src.join("sub/c.txt"));

        let files = discover_files(&[src.clone()], false);
        assert_eq!(files, vec![src.join("a.txt")]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_discovered() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        create_file(&src.join("real.txt"));
        std::os::unix::fs::symlink(src.join("real.txt"), src.join("link.txt")).unwrap();

        let files = discover_files(&[src.clone()], true);
        assert_eq!(files, vec![src.join("real.txt")]);
    }

    #[test]
    fn missing_sources_are_passed_through() {
        let temp = tempdir().unwrap();
        let ghost = temp.path().join("ghost.txt");
        let files = discover_files(&[ghost.clone()], true);
        assert_eq!(files, vec![ghost]);
    }

    #[test]
    fn duplicate_sources_collapse() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("a.txt");
        create_file(&file);

        let files = discover_files(&[file.clone(), file.clone()], false);
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn file_list_skips_comments_and_duplicates() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a.txt");
        let b = temp.path().join("b.txt");
        let list = temp.path().join("files.txt");
        std::fs::write(
            &list,
            format!(
                "# saved selection\n{}\n\n{}\n{}\n",
                a.display(),
                b.display(),
                a.display()
            ),
        )
        .unwrap();

        let files = load_file_list(&list).unwrap();
        assert_eq!(files, vec![a, b]);
    }

    #[test]
    fn file_list_entries_become_absolute() {
        let temp = tempdir().unwrap();
        let list = temp.path().join("files.txt");
        std::fs::write(&list, "relative/one.txt\n").unwrap();

        let files = load_file_list(&list).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].is_absolute());
        assert!(files[0].ends_with("relative/one.txt"));
    }

    #[test]
    fn missing_file_list_is_an_error() {
        let temp = tempdir().unwrap();
        assert!(load_file_list(&temp.path().join("nope.txt")).is_err());
    }

    #[test]
    fn gather_merges_sources_and_list_without_duplicates() {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a.txt");
        let b = temp.path().join("b.txt");
        create_file(&a);
        create_file(&b);
        let list = temp.path().join("files.txt");
        std::fs::write(&list, format!("{}\n{}\n", a.display(), b.display())).unwrap();

        let files = gather(&[a.clone()], Some(&list), false).unwrap();
        assert_eq!(files, vec![a, b]);
    }
}
