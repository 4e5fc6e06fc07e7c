use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bookmark::{Bookmark, BookmarkState};
use crate::resolver::{relative_to, resolve_absolute, resolve_in_root};
use crate::scratch::{CopyError, ScratchAreaManager, ScratchError};

/// Why a bookmark with a reachable absolute path could not get a working copy.
#[derive(Debug, Error)]
pub enum WorkingCopyError {
    #[error(transparent)]
    Scratch(#[from] ScratchError),
    #[error(transparent)]
    Copy(#[from] CopyError),
    #[error("Working copy {0} is outside the workspace root")]
    OutsideRoot(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub direct: usize,
    pub working_copy: usize,
    pub disabled: usize,
    /// Disabled bookmarks that carry a failure diagnostic rather than a
    /// plain missing target.
    pub failed: usize,
}

impl ReconcileSummary {
    pub fn from_bookmarks(bookmarks: &[Bookmark]) -> Self {
        let mut summary = Self::default();
        for bookmark in bookmarks {
            match bookmark.state() {
                BookmarkState::Direct => summary.direct += 1,
                BookmarkState::WorkingCopy => summary.working_copy += 1,
                BookmarkState::Disabled => {
                    summary.disabled += 1;
                    if bookmark.diagnostic.is_some() {
                        summary.failed += 1;
                    }
                }
            }
        }
        summary
    }
}

/// Recomputes `active_path` and `disabled` for bookmarks against a root.
#[derive(Debug, Default)]
pub struct Reconciler {
    scratch: ScratchAreaManager,
}

impl Reconciler {
    pub fn new(scratch: ScratchAreaManager) -> Self {
        Self { scratch }
    }

    pub fn scratch(&self) -> &ScratchAreaManager {
        &self.scratch
    }

    /// Reconciles every bookmark in input order.
    ///
    /// A failure on one bookmark disables it and attaches a diagnostic; the
    /// rest of the batch is still processed.
    pub fn reconcile_all(&self, root: &Path, bookmarks: Vec<Bookmark>) -> Vec<Bookmark> {
        bookmarks
            .into_iter()
            .map(|bookmark| self.reconcile(root, bookmark))
            .collect()
    }

    pub fn reconcile(&self, root: &Path, mut bookmark: Bookmark) -> Bookmark {
        if resolve_in_root(root, &bookmark.base_path).is_reachable() {
            debug!(title = %bookmark.title, path = %bookmark.base_path, "bookmark reachable under root");
            bookmark.mark_direct();
            return bookmark;
        }

        if !resolve_absolute(&bookmark.abs_path).is_reachable() {
            debug!(title = %bookmark.title, abs_path = %bookmark.abs_path, "bookmark target missing");
            bookmark.mark_disabled(None);
            return bookmark;
        }

        match self.materialize(root, &bookmark) {
            Ok(active_path) => {
                debug!(title = %bookmark.title, active_path = %active_path, "using working copy");
                bookmark.mark_working_copy(active_path);
            }
            Err(err) => {
                warn!(title = %bookmark.title, error = %err, "failed to prepare working copy");
                bookmark.mark_disabled(Some(err.to_string()));
            }
        }
        bookmark
    }

    fn materialize(&self, root: &Path, bookmark: &Bookmark) -> Result<String, WorkingCopyError> {
        let scratch = self.scratch.ensure_scratch_area(root)?;
        let copy = self.scratch.copy_into(
            &scratch,
            Path::new(bookmark.abs_path.trim()),
            &bookmark.title,
        )?;
        relative_to(root, &copy)
            .ok_or_else(|| WorkingCopyError::OutsideRoot(copy.display().to_string()))
    }
}

/// Reconciles with the default scratch directory and copy limit.
pub fn reconcile_all(root: &Path, bookmarks: Vec<Bookmark>) -> Vec<Bookmark> {
    Reconciler::default().reconcile_all(root, bookmarks)
}
