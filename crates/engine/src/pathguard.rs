use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};

/// Resolve a caller-supplied relative path against a sandbox root.
///
/// The input is normalized lexically first (leading slashes stripped,
/// `.`/`..` collapsed, `..` past the root rejected), then the deepest
/// existing ancestor is canonicalized so symlinks cannot smuggle the
/// resolved path outside the root. An empty input resolves to the root
/// itself. Every file, listing, write, delete, and run operation goes
/// through this guard before touching the filesystem.
pub fn resolve(root: &Path, user_path: &str) -> Result<PathBuf> {
    let cleaned = user_path.trim().replace('\\', "/");
    let cleaned = cleaned.trim_start_matches('/');

    let mut parts: Vec<OsString> = Vec::new();
    for comp in Path::new(cleaned).components() {
        match comp {
            Component::Normal(c) => parts.push(c.to_os_string()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(EngineError::PathEscape(user_path.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(EngineError::PathEscape(user_path.to_string()));
            }
        }
    }

    let canon_root = root.canonicalize()?;
    let mut joined = canon_root.clone();
    for p in &parts {
        joined.push(p);
    }

    // Walk up until a canonicalizable ancestor is found. Components that
    // exist but fail to canonicalize (dangling symlinks) are rejected
    // outright: writing through one would follow the link target.
    let mut existing = joined;
    let mut missing: Vec<OsString> = Vec::new();
    let canon = loop {
        match existing.canonicalize() {
            Ok(c) => break c,
            Err(_) => {
                if existing.symlink_metadata().is_ok() {
                    return Err(EngineError::PathEscape(user_path.to_string()));
                }
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        missing.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Err(EngineError::PathEscape(user_path.to_string())),
                }
            }
        }
    };

    if canon != canon_root && !canon.starts_with(&canon_root) {
        return Err(EngineError::PathEscape(user_path.to_string()));
    }

    let mut out = canon;
    for name in missing.iter().rev() {
        out.push(name);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn empty_path_resolves_to_root() {
        let dir = root();
        let resolved = resolve(dir.path(), "").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn plain_relative_path_joins() {
        let dir = root();
        let resolved = resolve(dir.path(), "a/b.txt").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("a/b.txt"));
    }

    #[test]
    fn leading_slash_is_stripped() {
        let dir = root();
        let resolved = resolve(dir.path(), "/a.txt").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("a.txt"));
    }

    #[test]
    fn dotdot_within_bounds_collapses() {
        let dir = root();
        let resolved = resolve(dir.path(), "a/../b.txt").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("b.txt"));
    }

    #[test]
    fn dotdot_escape_fails() {
        let dir = root();
        let err = resolve(dir.path(), "../outside").unwrap_err();
        assert!(matches!(err, EngineError::PathEscape(_)));
    }

    #[test]
    fn deep_dotdot_escape_fails() {
        let dir = root();
        let err = resolve(dir.path(), "a/../../outside").unwrap_err();
        assert!(matches!(err, EngineError::PathEscape(_)));
    }

    #[test]
    fn symlink_escape_fails() {
        let dir = root();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let err = resolve(dir.path(), "link/secret").unwrap_err();
        assert!(matches!(err, EngineError::PathEscape(_)));
    }

    #[test]
    fn symlink_within_root_is_allowed() {
        let dir = root();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();

        let resolved = resolve(dir.path(), "alias/file.txt").unwrap();
        assert_eq!(
            resolved,
            dir.path().canonicalize().unwrap().join("real/file.txt")
        );
    }

    #[test]
    fn dangling_symlink_fails() {
        let dir = root();
        std::os::unix::fs::symlink("/nonexistent/target", dir.path().join("dead")).unwrap();

        let err = resolve(dir.path(), "dead").unwrap_err();
        assert!(matches!(err, EngineError::PathEscape(_)));
    }

    #[test]
    fn nonexistent_tail_is_fine() {
        let dir = root();
        let resolved = resolve(dir.path(), "new/sub/file.txt").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }
}
