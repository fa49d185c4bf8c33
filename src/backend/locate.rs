//! Artifact locator - finds the built compiler inside a build tree
//!
//! CMake layouts differ between generators and project versions: the
//! executable may land in the build root, in `src/`, or somewhere deeper
//! (`bin/`, `Debug/`, ...). Candidates are checked in a fixed order:
//!
//! 1. `<build_root>/<name>`
//! 2. `<build_root>/src/<name>`
//! 3. the first match of a bounded walk of `<build_root>`
//!
//! The walk visits entries sorted by file name, never follows symlinks (so
//! directory cycles are impossible) and stops at the first match.

use std::env::consts::EXE_SUFFIX;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Deepest directory level searched by the fallback walk.
pub const MAX_SEARCH_DEPTH: usize = 6;

/// Locate `name` under `build_root`, or `None` when no candidate exists.
pub fn locate(build_root: &Path, name: &str) -> Option<PathBuf> {
    let names = candidate_names(name);

    for dir in [build_root.to_path_buf(), build_root.join("src")] {
        for candidate in &names {
            let path = dir.join(candidate);
            if path.is_file() {
                return Some(path);
            }
        }
    }

    search_tree(build_root, &names)
}

/// `name` plus the platform-suffixed form (e.g. `chtholly.exe`), if different.
fn candidate_names(name: &str) -> Vec<String> {
    let mut names = vec![name.to_string()];
    if !EXE_SUFFIX.is_empty() && !name.ends_with(EXE_SUFFIX) {
        names.push(format!("{}{}", name, EXE_SUFFIX));
    }
    names
}

fn search_tree(build_root: &Path, names: &[String]) -> Option<PathBuf> {
    WalkDir::new(build_root)
        .follow_links(false)
        .max_depth(MAX_SEARCH_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|file_name| names.iter().any(|n| n == file_name))
        })
        .map(|entry| entry.into_path())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_prefers_build_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("chtholly"));
        touch(&dir.path().join("src/chtholly"));
        assert_eq!(locate(dir.path(), "chtholly"), Some(dir.path().join("chtholly")));
    }

    #[test]
    fn test_finds_src_layout() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("src/chtholly"));
        assert_eq!(locate(dir.path(), "chtholly"), Some(dir.path().join("src/chtholly")));
    }

    #[test]
    fn test_src_beats_deeper_matches() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a/chtholly"));
        touch(&dir.path().join("src/chtholly"));
        assert_eq!(locate(dir.path(), "chtholly"), Some(dir.path().join("src/chtholly")));
    }

    #[test]
    fn test_recursive_fallback_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("out/zeta/chtholly"));
        touch(&dir.path().join("out/alpha/chtholly"));
        assert_eq!(
            locate(dir.path(), "chtholly"),
            Some(dir.path().join("out/alpha/chtholly"))
        );
    }

    #[test]
    fn test_directory_with_matching_name_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("chtholly")).unwrap();
        assert_eq!(locate(dir.path(), "chtholly"), None);
    }

    #[test]
    fn test_not_found() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("src/other"));
        assert_eq!(locate(dir.path(), "chtholly"), None);
    }

    #[test]
    fn test_missing_build_root() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(locate(&dir.path().join("nope"), "chtholly"), None);
    }

    #[test]
    fn test_depth_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut deep = dir.path().to_path_buf();
        for i in 0..MAX_SEARCH_DEPTH + 1 {
            deep = deep.join(format!("d{}", i));
        }
        touch(&deep.join("chtholly"));
        assert_eq!(locate(dir.path(), "chtholly"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_terminates() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop/back")).unwrap();
        assert_eq!(locate(dir.path(), "chtholly"), None);
    }
}
