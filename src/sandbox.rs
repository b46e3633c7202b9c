//! Path sandboxing: every path an MCP client supplies must resolve to a
//! descendant of the active bundle's extraction directory before any
//! component touches the filesystem with it.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Join `requested` onto `root`, rejecting traversal attempts, and verify
/// the canonical result is `root` itself or a descendant of it.
pub fn normalize_under_root(root: &Path, requested: &str) -> Result<PathBuf> {
    let relative = strip_and_reject(requested)?;

    let joined = root.join(&relative);
    let canonical_root = root
        .canonicalize()
        .map_err(|_| Error::PathNotFound(root.to_path_buf()))?;

    let canonical = joined
        .canonicalize()
        .map_err(|_| Error::PathNotFound(joined.clone()))?;

    if canonical == canonical_root || canonical.starts_with(&canonical_root) {
        Ok(canonical)
    } else {
        Err(Error::InvalidPath(joined))
    }
}

/// Strip leading separators and reject any `..` component, returning the
/// remaining relative path. Used both for live filesystem lookups and for
/// sanitizing archive member names before extraction (component E).
pub fn strip_and_reject(requested: &str) -> Result<PathBuf> {
    let trimmed = requested.trim_start_matches(['/', '\\']);
    let mut out = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::InvalidPath(PathBuf::from(requested)));
            }
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_parent_traversal() {
        assert!(strip_and_reject("../../etc/passwd").is_err());
        assert!(strip_and_reject("a/../../b").is_err());
    }

    #[test]
    fn strips_leading_separators() {
        let p = strip_and_reject("/foo/bar").unwrap();
        assert_eq!(p, PathBuf::from("foo/bar"));
    }

    #[test]
    fn normalizes_valid_descendant() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("cluster-resources")).unwrap();
        let resolved = normalize_under_root(tmp.path(), "cluster-resources").unwrap();
        assert!(resolved.starts_with(tmp.path().canonicalize().unwrap()));
    }

    #[test]
    fn rejects_escape_via_symlink_free_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = normalize_under_root(tmp.path(), "../outside");
        assert!(err.is_err());
    }
}
