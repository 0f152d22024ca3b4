//! Workspace sandbox
//!
//! Every file and shell operation resolves its paths through a `Workspace`.
//! A path either lands inside the root or is rejected with
//! `SandboxViolation`; it is never clamped or redirected.

use crate::error::{self, Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// The sandboxed root directory for one build session
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Canonicalized root
    root: PathBuf,
    /// Root as it was given (absolutized), accepted for absolute inputs too
    given: PathBuf,
}

impl Workspace {
    /// Create the root directory if needed and anchor the sandbox there
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let given = root.as_ref();
        fs::create_dir_all(given)
            .map_err(|e| error::io_failed(given.display().to_string(), e).with_operation("workspace::new"))?;

        let root = fs::canonicalize(given)
            .map_err(|e| error::io_failed(given.display().to_string(), e).with_operation("workspace::new"))?;
        let given = if given.is_absolute() {
            lexical_normalize(given)
        } else {
            root.clone()
        };

        Ok(Self { root, given })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a tool-supplied path to an absolute path inside the root.
    ///
    /// Relative paths are joined to the root; absolute paths must already lie
    /// inside it. `.` and `..` are folded lexically, then the deepest existing
    /// ancestor is canonicalized so symlinks cannot lead outside.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let raw_path = Path::new(raw);
        let joined = if raw_path.is_absolute() {
            raw_path.to_path_buf()
        } else {
            self.root.join(raw_path)
        };

        let normalized = lexical_normalize(&joined);
        let rebased = if normalized.starts_with(&self.root) {
            normalized
        } else if let Ok(rest) = normalized.strip_prefix(&self.given) {
            self.root.join(rest)
        } else {
            return Err(self.violation(raw));
        };

        let (ancestor, remainder) = canonicalize_ancestor(&rebased);
        let resolved = match ancestor {
            Some(ancestor) => ancestor.join(remainder),
            None => return Err(self.violation(raw)),
        };

        if !resolved.starts_with(&self.root) {
            tracing::warn!(path = raw, resolved = %resolved.display(), "path escapes workspace");
            return Err(self.violation(raw));
        }

        Ok(resolved)
    }

    /// Does `raw` stay inside the root when resolved from `base`?
    pub fn contains_from(&self, base: &Path, raw: &str) -> bool {
        let joined = if Path::new(raw).is_absolute() {
            PathBuf::from(raw)
        } else {
            base.join(raw)
        };
        match joined.to_str() {
            Some(s) => self.resolve(s).is_ok(),
            None => false,
        }
    }

    /// Render a path relative to the root, `/`-separated; the root itself is `.`
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rest) if rest.as_os_str().is_empty() => ".".to_string(),
            Ok(rest) => rest
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.display().to_string(),
        }
    }

    fn violation(&self, raw: &str) -> Error {
        Error::sandbox_violation(raw, self.root.display().to_string()).with_operation("workspace::resolve")
    }
}

/// Fold `.` and `..` without touching the filesystem
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            other => result.push(other),
        }
    }
    result
}

/// Symlinks followed while resolving one path before giving up
const MAX_LINK_HOPS: usize = 40;

/// Walk up to the nearest existing ancestor and canonicalize it.
/// Returns the canonical ancestor and the not-yet-existing remainder.
///
/// A dangling symlink is followed to its target, so the target (not the
/// link) decides containment.
fn canonicalize_ancestor(path: &Path) -> (Option<PathBuf>, PathBuf) {
    let mut current = path.to_path_buf();
    let mut suffix = Vec::new();
    let mut hops = 0;

    loop {
        if let Ok(canonical) = fs::canonicalize(&current) {
            let remainder: PathBuf = suffix.into_iter().rev().collect();
            return (Some(canonical), remainder);
        }
        let is_link = fs::symlink_metadata(&current)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            hops += 1;
            let target = match fs::read_link(&current) {
                Ok(target) if hops <= MAX_LINK_HOPS => target,
                _ => return (None, PathBuf::new()),
            };
            let base = current.parent().map(Path::to_path_buf).unwrap_or_default();
            current = lexical_normalize(&base.join(target));
            continue;
        }
        match current.file_name() {
            Some(name) => suffix.push(name.to_os_string()),
            None => return (None, PathBuf::new()),
        }
        if !current.pop() {
            return (None, PathBuf::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderloop_error::ErrorKind;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path().join("project")).unwrap();
        (dir, ws)
    }

    #[test]
    fn test_new_creates_root() {
        let (dir, ws) = workspace();
        assert!(dir.path().join("project").is_dir());
        assert!(ws.root().is_absolute());
    }

    #[test]
    fn test_resolve_relative() {
        let (_dir, ws) = workspace();
        let resolved = ws.resolve("src/main.py").unwrap();
        assert_eq!(resolved, ws.root().join("src/main.py"));
        assert_eq!(ws.resolve(".").unwrap(), ws.root());
        assert_eq!(ws.resolve("").unwrap(), ws.root());
    }

    #[test]
    fn test_resolve_folds_dots_inside_root() {
        let (_dir, ws) = workspace();
        let resolved = ws.resolve("a/./b/../c.txt").unwrap();
        assert_eq!(resolved, ws.root().join("a/c.txt"));
    }

    #[test]
    fn test_resolve_rejects_parent_escape() {
        let (_dir, ws) = workspace();
        let err = ws.resolve("../outside.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SandboxViolation);

        let err = ws.resolve("a/../../outside.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SandboxViolation);
    }

    #[test]
    fn test_resolve_absolute() {
        let (dir, ws) = workspace();
        let inside = ws.root().join("notes.md");
        assert_eq!(ws.resolve(inside.to_str().unwrap()).unwrap(), inside);

        let outside = dir.path().join("elsewhere.md");
        let err = ws.resolve(outside.to_str().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SandboxViolation);

        assert!(ws.resolve("/etc/passwd").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let (dir, ws) = workspace();
        let outside = dir.path().join("secret");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, ws.root().join("link")).unwrap();

        let err = ws.resolve("link/data.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SandboxViolation);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_dangling_symlink() {
        let (dir, ws) = workspace();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(outside.join("pwned.txt"), ws.root().join("link")).unwrap();

        let err = ws.resolve("link").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SandboxViolation);
        assert!(ws.resolve("link/deeper.txt").is_err());

        // a dangling link that stays inside resolves to its target
        std::os::unix::fs::symlink("notes/todo.md", ws.root().join("todo")).unwrap();
        assert_eq!(ws.resolve("todo").unwrap(), ws.root().join("notes/todo.md"));

        // cycles are rejected rather than followed forever
        std::os::unix::fs::symlink("loop_b", ws.root().join("loop_a")).unwrap();
        std::os::unix::fs::symlink("loop_a", ws.root().join("loop_b")).unwrap();
        assert!(ws.resolve("loop_a").is_err());
    }

    #[test]
    fn test_contains_from() {
        let (_dir, ws) = workspace();
        let sub = ws.root().join("src");
        assert!(ws.contains_from(&sub, "../README.md"));
        assert!(!ws.contains_from(&sub, "../../x"));
    }

    #[test]
    fn test_relative() {
        let (_dir, ws) = workspace();
        assert_eq!(ws.relative(ws.root()), ".");
        assert_eq!(ws.relative(&ws.root().join("src/app.py")), "src/app.py");
    }
}
