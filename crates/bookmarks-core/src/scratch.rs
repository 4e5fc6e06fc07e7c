use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const DEFAULT_SCRATCH_DIR: &str = ".tmp";
pub const DEFAULT_MAX_COPY_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ScratchError {
    #[error("Workspace root is not a directory: {}", .0.display())]
    RootMissing(PathBuf),
    #[error("Scratch path exists but is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("Failed to create scratch area {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Invalid working copy name: {0:?}")]
    InvalidName(String),
    #[error("Copy source does not exist: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("Copy source {} is {size} bytes, over the {limit} byte limit", .path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
    #[error("Failed to copy {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Copy destination {} is inside source {}", .to.display(), .from.display())]
    DestinationInsideSource { from: PathBuf, to: PathBuf },
    #[error("Copy source {} is inside destination {}", .from.display(), .to.display())]
    SourceInsideDestination { from: PathBuf, to: PathBuf },
    #[error("Failed to walk {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

/// What to do with an entry already present at the copy destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    /// Remove the existing entry first so the destination mirrors the source.
    Replace,
    /// Write over existing files, leaving unrelated entries in place.
    Merge,
}

/// Owns the hidden scratch directory that holds working copies.
#[derive(Debug)]
pub struct ScratchAreaManager {
    dir_name: String,
    max_copy_bytes: u64,
    known_roots: Mutex<HashSet<PathBuf>>,
}

impl Default for ScratchAreaManager {
    fn default() -> Self {
        Self::new(DEFAULT_SCRATCH_DIR, DEFAULT_MAX_COPY_BYTES)
    }
}

impl ScratchAreaManager {
    pub fn new(dir_name: impl Into<String>, max_copy_bytes: u64) -> Self {
        Self {
            dir_name: dir_name.into(),
            max_copy_bytes,
            known_roots: Mutex::new(HashSet::new()),
        }
    }

    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    pub fn max_copy_bytes(&self) -> u64 {
        self.max_copy_bytes
    }

    pub fn scratch_path(&self, root: &Path) -> PathBuf {
        root.join(&self.dir_name)
    }

    /// Makes sure the scratch directory exists directly under `root`.
    ///
    /// The root itself is never created. Repeat calls for a root already seen
    /// by this manager only stat the directory.
    pub fn ensure_scratch_area(&self, root: &Path) -> Result<PathBuf, ScratchError> {
        let scratch = self.scratch_path(root);
        if self.is_known(root) && scratch.is_dir() {
            return Ok(scratch);
        }
        if !root.is_dir() {
            return Err(ScratchError::RootMissing(root.to_path_buf()));
        }
        match fs::create_dir(&scratch) {
            Ok(()) => info!(path = %scratch.display(), "created scratch area"),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if !scratch.is_dir() {
                    return Err(ScratchError::NotADirectory(scratch));
                }
            }
            Err(source) => {
                return Err(ScratchError::Create {
                    path: scratch,
                    source,
                })
            }
        }
        self.remember(root);
        Ok(scratch)
    }

    /// Copies `source` into `scratch/name`, replacing whatever was there.
    pub fn copy_into(
        &self,
        scratch: &Path,
        source: &Path,
        name: &str,
    ) -> Result<PathBuf, CopyError> {
        validate_name(name)?;
        let target = scratch.join(name);
        let bytes = copy_entry(source, &target, self.max_copy_bytes, Overwrite::Replace)?;
        debug!(
            source = %source.display(),
            target = %target.display(),
            bytes,
            "copied working copy"
        );
        Ok(target)
    }

    fn is_known(&self, root: &Path) -> bool {
        let known = self
            .known_roots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        known.contains(root)
    }

    fn remember(&self, root: &Path) {
        let mut known = self
            .known_roots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        known.insert(root.to_path_buf());
    }
}

fn validate_name(name: &str) -> Result<(), CopyError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(CopyError::InvalidName(name.to_string())),
    }
}

/// Total size in bytes of a file, or of every file under a directory.
pub fn entry_size(path: &Path) -> Result<u64, CopyError> {
    let mut total = 0u64;
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.map_err(|source| CopyError::Walk {
            path: path.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            let meta = entry.metadata().map_err(|source| CopyError::Walk {
                path: entry.path().to_path_buf(),
                source,
            })?;
            total = total.saturating_add(meta.len());
        }
    }
    Ok(total)
}

/// Copies a file or directory tree from `source` to `dest`.
///
/// Returns the number of bytes copied. Nothing is written when the source is
/// larger than `max_bytes`.
pub fn copy_entry(
    source: &Path,
    dest: &Path,
    max_bytes: u64,
    overwrite: Overwrite,
) -> Result<u64, CopyError> {
    if !source.exists() {
        return Err(CopyError::SourceMissing(source.to_path_buf()));
    }
    let canonical_source = source.canonicalize().map_err(|err| io_error(source, err))?;
    if let Some(canonical_dest) = canonical_target(dest) {
        if canonical_dest == canonical_source {
            debug!(path = %canonical_source.display(), "copy source is already the destination");
            return Ok(0);
        }
        if canonical_dest.starts_with(&canonical_source) {
            return Err(CopyError::DestinationInsideSource {
                from: source.to_path_buf(),
                to: dest.to_path_buf(),
            });
        }
        if overwrite == Overwrite::Replace && canonical_source.starts_with(&canonical_dest) {
            return Err(CopyError::SourceInsideDestination {
                from: source.to_path_buf(),
                to: dest.to_path_buf(),
            });
        }
    }

    let size = entry_size(source)?;
    if size > max_bytes {
        return Err(CopyError::TooLarge {
            path: source.to_path_buf(),
            size,
            limit: max_bytes,
        });
    }

    if overwrite == Overwrite::Replace {
        remove_existing(dest)?;
    }

    if source.is_file() {
        return fs::copy(source, dest).map_err(|err| io_error(dest, err));
    }

    let mut copied = 0u64;
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(|err| CopyError::Walk {
            path: source.to_path_buf(),
            source: err,
        })?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| CopyError::SourceMissing(entry.path().to_path_buf()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| io_error(&target, err))?;
        } else {
            copied += fs::copy(entry.path(), &target).map_err(|err| io_error(&target, err))?;
        }
    }
    Ok(copied)
}

/// Canonical form of a copy destination, which may not exist yet.
fn canonical_target(dest: &Path) -> Option<PathBuf> {
    if let Ok(path) = dest.canonicalize() {
        return Some(path);
    }
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = dest.file_name()?;
    parent.canonicalize().ok().map(|parent| parent.join(name))
}

fn remove_existing(path: &Path) -> Result<(), CopyError> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|err| io_error(path, err))
}

fn io_error(path: &Path, source: std::io::Error) -> CopyError {
    CopyError::Io {
        path: path.to_path_buf(),
        source,
    }
}
