use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("Failed to resolve {}: {source}", .path.display())]
pub struct ResolveError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

impl Reachability {
    pub fn is_reachable(self) -> bool {
        self == Reachability::Reachable
    }

    fn of(path: &Path) -> Self {
        // `exists` follows symlinks, so a dangling link counts as absent.
        if path.exists() {
            Reachability::Reachable
        } else {
            Reachability::Unreachable
        }
    }
}

/// Checks whether `base_path` exists under `root`.
pub fn resolve_in_root(root: &Path, base_path: &str) -> Reachability {
    let trimmed = base_path.trim();
    if trimmed.is_empty() {
        return Reachability::Unreachable;
    }
    Reachability::of(&root.join(trimmed))
}

/// Checks whether an absolute bookmark target exists. Relative input never
/// counts as a durable location.
pub fn resolve_absolute(abs_path: &str) -> Reachability {
    let trimmed = abs_path.trim();
    let path = Path::new(trimmed);
    if trimmed.is_empty() || !path.is_absolute() {
        return Reachability::Unreachable;
    }
    Reachability::of(path)
}

/// Canonical absolute form of `path`, joined onto `root` when relative.
pub fn to_absolute(root: &Path, path: &Path) -> Result<PathBuf, ResolveError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    joined.canonicalize().map_err(|source| ResolveError {
        path: joined.clone(),
        source,
    })
}

/// Root-relative rendering of `path` using `/` separators, or `None` when
/// `path` does not live under `root`.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn resolve_in_root_reports_existence() {
        let temp = TempDir::new().expect("tempdir");
        fs::create_dir_all(temp.path().join("notes")).expect("notes");
        fs::write(temp.path().join("notes").join("doc.txt"), "hi").expect("write");

        assert!(resolve_in_root(temp.path(), "notes/doc.txt").is_reachable());
        assert!(resolve_in_root(temp.path(), "notes").is_reachable());
        assert_eq!(
            resolve_in_root(temp.path(), "notes/missing.txt"),
            Reachability::Unreachable
        );
        assert_eq!(resolve_in_root(temp.path(), "  "), Reachability::Unreachable);
    }

    #[test]
    fn resolve_absolute_rejects_relative_and_empty() {
        let temp = TempDir::new().expect("tempdir");
        let file = temp.path().join("doc.txt");
        fs::write(&file, "hi").expect("write");

        assert!(resolve_absolute(&file.to_string_lossy()).is_reachable());
        assert_eq!(resolve_absolute("doc.txt"), Reachability::Unreachable);
        assert_eq!(resolve_absolute(""), Reachability::Unreachable);
    }

    #[test]
    fn to_absolute_canonicalizes_relative_input() {
        let temp = TempDir::new().expect("tempdir");
        let root = temp.path().canonicalize().expect("canonical root");
        fs::create_dir_all(root.join("a")).expect("dir");
        fs::write(root.join("a").join("nb.ipynb"), "{}").expect("write");

        let resolved = to_absolute(&root, Path::new("a/../a/nb.ipynb")).expect("resolve");
        assert_eq!(resolved, root.join("a").join("nb.ipynb"));
    }

    #[test]
    fn to_absolute_surfaces_missing_paths() {
        let temp = TempDir::new().expect("tempdir");
        let err = to_absolute(temp.path(), Path::new("missing/nb.ipynb")).expect_err("missing");
        assert!(err.path.ends_with("missing/nb.ipynb"));
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn relative_to_renders_forward_slashes() {
        let root = Path::new("/ws");
        assert_eq!(
            relative_to(root, Path::new("/ws/.tmp/doc")).as_deref(),
            Some(".tmp/doc")
        );
        assert_eq!(relative_to(root, Path::new("/elsewhere/doc")), None);
    }
}
