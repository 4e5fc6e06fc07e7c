use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

pub const UNCATEGORIZED: &str = "Uncategorized";

/// A bookmarked file or folder.
///
/// `title`, `base_path` and `abs_path` are supplied when the bookmark is
/// created. `active_path` and `disabled` are derived by reconciliation and
/// refreshed every time the batch is reconciled against a root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub title: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub abs_path: String,
    #[serde(default)]
    pub active_path: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Which of the three mutually exclusive shapes a bookmark is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookmarkState {
    Direct,
    WorkingCopy,
    Disabled,
}

impl Bookmark {
    pub fn new(
        title: impl Into<String>,
        base_path: impl Into<String>,
        abs_path: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            base_path: base_path.into(),
            abs_path: abs_path.into(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn state(&self) -> BookmarkState {
        if self.disabled || self.active_path.is_empty() {
            BookmarkState::Disabled
        } else if self.active_path == self.base_path {
            BookmarkState::Direct
        } else {
            BookmarkState::WorkingCopy
        }
    }

    /// True when `active_path` points inside the scratch directory `scratch_dir`.
    pub fn is_working_copy_in(&self, scratch_dir: &str) -> bool {
        !self.disabled && is_under_scratch(&self.active_path, scratch_dir)
    }

    pub(crate) fn mark_direct(&mut self) {
        self.active_path = self.base_path.clone();
        self.disabled = false;
        self.diagnostic = None;
    }

    pub(crate) fn mark_working_copy(&mut self, active_path: String) {
        self.active_path = active_path;
        self.disabled = false;
        self.diagnostic = None;
    }

    pub(crate) fn mark_disabled(&mut self, diagnostic: Option<String>) {
        self.active_path.clear();
        self.disabled = true;
        self.diagnostic = diagnostic;
    }
}

fn is_under_scratch(active_path: &str, scratch_dir: &str) -> bool {
    let mut components = Path::new(active_path).components();
    matches!(
        components.next(),
        Some(Component::Normal(first)) if first == scratch_dir
    ) && components.next().is_some()
}
