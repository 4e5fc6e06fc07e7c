//! Bookmark reconciliation and working-copy sync.
//!
//! A bookmark names a file or folder by a root-relative path and by its
//! absolute location. [`reconcile`] decides, for the current workspace root,
//! whether the bookmark can be opened in place, needs a working copy staged in
//! the root's scratch area, or is unavailable. [`sync`] copies edits made in a
//! working copy back to the absolute location on request.

pub mod bookmark;
pub mod config;
pub mod reconcile;
pub mod resolver;
pub mod scratch;
pub mod settings;
pub mod sync;

pub use bookmark::{Bookmark, BookmarkState};
pub use reconcile::{reconcile_all, Reconciler};
pub use sync::{get_absolute_path, SyncEngine};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
pub(crate) mod test_env {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serializes tests that mutate process environment variables.
    pub fn lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::version;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
