//! Path normalization and containment.
//!
//! Stamp records are keyed by lexically normalized paths so that
//! `/proj/./out.txt` and `/proj/out.txt` resolve to the same record.
//! Normalization never touches the filesystem: stamped outputs may not exist
//! yet when they are queried.

use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path: drops `.` components and resolves `..`
/// against the preceding component where one exists.
///
/// `..` at the start of a relative path is kept, and `..` directly under a
/// root collapses into the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(Component::ParentDir),
            },
            other => out.push(other),
        }
    }
    out
}

/// Returns true when `path` is under `root`, inclusive of `root` itself.
///
/// The comparison is component-wise on normalized forms, so `/root2` is not
/// under `/root`.
pub fn is_under(path: &Path, root: &Path) -> bool {
    normalize(path).starts_with(normalize(root))
}
