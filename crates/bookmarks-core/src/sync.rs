use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;
use walkdir::WalkDir;

use crate::bookmark::Bookmark;
use crate::resolver::{relative_to, to_absolute, ResolveError};
use crate::scratch::{
    copy_entry, CopyError, Overwrite, DEFAULT_MAX_COPY_BYTES, DEFAULT_SCRATCH_DIR,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Bookmark {0} is disabled; reconcile it before syncing")]
    Disabled(String),
    #[error("Bookmark {0} has no absolute destination path")]
    InvalidDestination(String),
    #[error("Sync source does not exist: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("Destination directory does not exist: {}", .0.display())]
    DestinationParentMissing(PathBuf),
    #[error("Sync failed: {0}")]
    Copy(#[from] CopyError),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub title: String,
    pub source: String,
    pub destination: String,
    pub bytes: u64,
    /// True when source and destination were already the same entry.
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub title: String,
    pub source: String,
    pub destination: String,
    pub source_digest: Option<String>,
    pub destination_digest: Option<String>,
    pub in_sync: bool,
}

/// The absolute form of a path together with the root-relative form it was
/// given as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AbsolutePathInfo {
    pub abs_path: String,
    pub active_path: String,
}

/// Copies working copies back to their durable locations on request.
///
/// Policy is last-write-wins: the destination is overwritten without any
/// divergence check. `status` reports digests for callers that want to warn.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    max_copy_bytes: u64,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COPY_BYTES)
    }
}

impl SyncEngine {
    pub fn new(max_copy_bytes: u64) -> Self {
        Self { max_copy_bytes }
    }

    /// Copies `root/active_path` over `abs_path`.
    pub fn sync(&self, root: &Path, bookmark: &Bookmark) -> Result<SyncReport, SyncError> {
        let source = active_source(root, bookmark)?;
        self.sync_from(&source, bookmark)
    }

    /// Copies an explicitly supplied `source` over the bookmark's `abs_path`.
    pub fn sync_from(&self, source: &Path, bookmark: &Bookmark) -> Result<SyncReport, SyncError> {
        let destination = destination(bookmark)?;
        if !source.exists() {
            return Err(SyncError::SourceMissing(source.to_path_buf()));
        }
        let parent = destination
            .parent()
            .ok_or_else(|| SyncError::InvalidDestination(bookmark.title.clone()))?;
        if !parent.is_dir() {
            return Err(SyncError::DestinationParentMissing(parent.to_path_buf()));
        }

        let mut report = SyncReport {
            title: bookmark.title.clone(),
            source: source.display().to_string(),
            destination: destination.display().to_string(),
            bytes: 0,
            skipped: false,
        };
        if same_entry(source, &destination) {
            report.skipped = true;
            return Ok(report);
        }

        report.bytes = copy_entry(source, &destination, self.max_copy_bytes, Overwrite::Merge)?;
        info!(
            title = %bookmark.title,
            destination = %report.destination,
            bytes = report.bytes,
            "synced bookmark"
        );
        Ok(report)
    }

    /// Compares the working copy with the durable location by content digest.
    pub fn status(&self, root: &Path, bookmark: &Bookmark) -> Result<SyncStatus, SyncError> {
        let source = active_source(root, bookmark)?;
        let destination = destination(bookmark)?;
        let source_digest = digest_if_present(&source)?;
        let destination_digest = digest_if_present(&destination)?;
        let in_sync = source_digest.is_some() && source_digest == destination_digest;
        Ok(SyncStatus {
            title: bookmark.title.clone(),
            source: source.display().to_string(),
            destination: destination.display().to_string(),
            source_digest,
            destination_digest,
            in_sync,
        })
    }
}

fn active_source(root: &Path, bookmark: &Bookmark) -> Result<PathBuf, SyncError> {
    if bookmark.disabled || bookmark.active_path.trim().is_empty() {
        return Err(SyncError::Disabled(bookmark.title.clone()));
    }
    Ok(root.join(bookmark.active_path.trim()))
}

fn destination(bookmark: &Bookmark) -> Result<PathBuf, SyncError> {
    let destination = PathBuf::from(bookmark.abs_path.trim());
    if !destination.is_absolute() {
        return Err(SyncError::InvalidDestination(bookmark.title.clone()));
    }
    Ok(destination)
}

fn same_entry(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn digest_if_present(path: &Path) -> Result<Option<String>, CopyError> {
    if !path.exists() {
        return Ok(None);
    }
    digest_entry(path).map(Some)
}

/// SHA-256 over a file, or over every file of a directory in name order
/// (relative path then contents).
pub fn digest_entry(path: &Path) -> Result<String, CopyError> {
    let mut hasher = Sha256::new();
    if path.is_file() {
        let bytes = fs::read(path).map_err(|source| CopyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        hasher.update(&bytes);
        return Ok(format!("{:x}", hasher.finalize()));
    }
    for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|source| CopyError::Walk {
            path: path.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(rel) = relative_to(path, entry.path()) {
            hasher.update(rel.as_bytes());
        }
        let bytes = fs::read(entry.path()).map_err(|source| CopyError::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Absolute form of `path` (relative to `root`) alongside the relative form,
/// used when a bookmark is first created.
pub fn get_absolute_path(root: &Path, path: &str) -> Result<AbsolutePathInfo, ResolveError> {
    let trimmed = path.trim();
    let absolute = to_absolute(root, Path::new(trimmed))?;
    Ok(AbsolutePathInfo {
        abs_path: absolute.display().to_string(),
        active_path: trimmed.to_string(),
    })
}

/// Finds the bookmark whose working copy is the file the editor just saved.
pub fn find_for_saved_path<'a>(
    bookmarks: &'a [Bookmark],
    scratch_dir: &str,
    saved_path: &str,
) -> Option<&'a Bookmark> {
    let saved = saved_path.trim().trim_start_matches("./");
    bookmarks
        .iter()
        .find(|bookmark| bookmark.is_working_copy_in(scratch_dir) && bookmark.active_path == saved)
}

/// Autosync lookup using the default scratch directory name.
pub fn find_working_copy<'a>(bookmarks: &'a [Bookmark], saved_path: &str) -> Option<&'a Bookmark> {
    find_for_saved_path(bookmarks, DEFAULT_SCRATCH_DIR, saved_path)
}
