use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bookmark::{Bookmark, UNCATEGORIZED};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Bookmark title is required")]
    MissingTitle,
    #[error("The bookmark already exists: {0}")]
    Duplicate(String),
    #[error("A bookmark named {0:?} already points elsewhere")]
    TitleTaken(String),
    #[error("No bookmark named {0:?}")]
    NotFound(String),
}

/// What `add` does when the title is taken by a bookmark with a different
/// absolute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    Overwrite,
    SaveAsNew,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "title", rename_all = "snake_case")]
pub enum AddOutcome {
    Added(String),
    Overwritten(String),
    SavedAsNew(String),
}

impl AddOutcome {
    pub fn title(&self) -> &str {
        match self {
            AddOutcome::Added(title)
            | AddOutcome::Overwritten(title)
            | AddOutcome::SavedAsNew(title) => title,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: Vec<String>,
    pub skipped: Vec<String>,
}

/// The persisted bookmark blob: an ordered list of `[title, bookmark]` pairs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub bookmarks: Vec<(String, Bookmark)>,
    /// RFC3339 timestamp of the last save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Settings {
    pub fn from_bookmarks(bookmarks: Vec<Bookmark>) -> Self {
        Self {
            bookmarks: bookmarks
                .into_iter()
                .map(|bookmark| (bookmark.title.clone(), bookmark))
                .collect(),
            updated_at: None,
        }
    }

    /// The bookmarks in stored order.
    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.bookmarks
            .iter()
            .map(|(_, bookmark)| bookmark.clone())
            .collect()
    }

    /// Replaces the stored records with a reconciled batch, keeping order.
    pub fn replace_bookmarks(&mut self, bookmarks: Vec<Bookmark>) {
        self.bookmarks = bookmarks
            .into_iter()
            .map(|bookmark| (bookmark.title.clone(), bookmark))
            .collect();
    }

    pub fn get(&self, title: &str) -> Option<&Bookmark> {
        self.position(title).map(|index| &self.bookmarks[index].1)
    }

    fn position(&self, title: &str) -> Option<usize> {
        self.bookmarks.iter().position(|(key, _)| key == title)
    }

    pub fn add(
        &mut self,
        mut bookmark: Bookmark,
        policy: DuplicatePolicy,
    ) -> Result<AddOutcome, SettingsError> {
        bookmark.title = bookmark.title.trim().to_string();
        if bookmark.title.is_empty() {
            return Err(SettingsError::MissingTitle);
        }
        if bookmark.category.trim().is_empty() {
            bookmark.category = UNCATEGORIZED.to_string();
        }

        let Some(index) = self.position(&bookmark.title) else {
            let title = bookmark.title.clone();
            self.bookmarks.push((title.clone(), bookmark));
            return Ok(AddOutcome::Added(title));
        };

        if self.bookmarks[index].1.abs_path == bookmark.abs_path {
            return Err(SettingsError::Duplicate(bookmark.title));
        }
        match policy {
            DuplicatePolicy::Reject => Err(SettingsError::TitleTaken(bookmark.title)),
            DuplicatePolicy::Overwrite => {
                let title = bookmark.title.clone();
                self.bookmarks[index] = (title.clone(), bookmark);
                Ok(AddOutcome::Overwritten(title))
            }
            DuplicatePolicy::SaveAsNew => {
                let title = self.copy_title(&bookmark);
                bookmark.title = title.clone();
                self.bookmarks.push((title.clone(), bookmark));
                Ok(AddOutcome::SavedAsNew(title))
            }
        }
    }

    /// `<stem>_(<n>).<ext>` where `n` counts stored bookmarks whose target has
    /// the same file name, bumped until the title is free.
    fn copy_title(&self, bookmark: &Bookmark) -> String {
        let file_name = abs_file_name(&bookmark.abs_path);
        let mut copies = self
            .bookmarks
            .iter()
            .filter(|(_, existing)| abs_file_name(&existing.abs_path) == file_name)
            .count();
        loop {
            let candidate = match bookmark.title.split_once('.') {
                Some((stem, ext)) => format!("{stem}_({copies}).{ext}"),
                None => format!("{}_({copies})", bookmark.title),
            };
            if self.position(&candidate).is_none() {
                return candidate;
            }
            copies += 1;
        }
    }

    pub fn remove(&mut self, title: &str) -> Result<Bookmark, SettingsError> {
        let index = self
            .position(title)
            .ok_or_else(|| SettingsError::NotFound(title.to_string()))?;
        Ok(self.bookmarks.remove(index).1)
    }

    /// Category names in first-seen order, `Uncategorized` first.
    pub fn categories(&self) -> Vec<String> {
        let mut categories = vec![UNCATEGORIZED.to_string()];
        for (_, bookmark) in &self.bookmarks {
            let category = bookmark.category.trim();
            if !category.is_empty() && !categories.iter().any(|c| c == category) {
                categories.push(category.to_string());
            }
        }
        categories
    }

    /// Moves every bookmark of `category` to `Uncategorized`; returns how many moved.
    pub fn delete_category(&mut self, category: &str) -> usize {
        if category == UNCATEGORIZED {
            return 0;
        }
        let mut moved = 0;
        for (_, bookmark) in &mut self.bookmarks {
            if bookmark.category == category {
                bookmark.category = UNCATEGORIZED.to_string();
                moved += 1;
            }
        }
        moved
    }

    /// Merges records from another blob. Titles already present are kept.
    ///
    /// The pair key is authoritative: each record's `title` is rewritten to
    /// match it, and an empty category becomes `Uncategorized`.
    pub fn import(&mut self, other: Settings) -> ImportReport {
        let mut report = ImportReport::default();
        for (key, mut bookmark) in other.bookmarks {
            let title = key.trim().to_string();
            if title.is_empty() {
                continue;
            }
            bookmark.title = title.clone();
            if bookmark.category.trim().is_empty() {
                bookmark.category = UNCATEGORIZED.to_string();
            }
            if self.position(&title).is_some() {
                report.skipped.push(title);
                continue;
            }
            report.imported.push(title.clone());
            self.bookmarks.push((title, bookmark));
        }
        report
    }
}

fn abs_file_name(abs_path: &str) -> &str {
    abs_path
        .trim_end_matches(&['/', '\\'][..])
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or("")
}

/// Order-insensitive comparison of two blobs by title.
pub fn same_bookmarks(a: &Settings, b: &Settings) -> bool {
    let left: BTreeMap<&str, &Bookmark> = a
        .bookmarks
        .iter()
        .map(|(title, bookmark)| (title.as_str(), bookmark))
        .collect();
    let right: BTreeMap<&str, &Bookmark> = b
        .bookmarks
        .iter()
        .map(|(title, bookmark)| (title.as_str(), bookmark))
        .collect();
    left == right
}

pub fn now_rfc3339() -> String {
    let now: DateTime<Local> = Local::now();
    now.to_rfc3339()
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "settings".into());
    name.push(".lock");
    path.with_file_name(name)
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(Settings::default());
    }
    let settings: Settings =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(settings)
}

fn write_settings(path: &Path, mut settings: Settings) -> Result<PathBuf> {
    settings.updated_at = Some(now_rfc3339());
    let tmp = path.with_extension("json.tmp");
    let raw = serde_json::to_string_pretty(&settings).context("serialize settings")?;
    fs::write(&tmp, raw).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(path.to_path_buf())
}

/// Runs `f` on the stored settings while holding an exclusive lock, saving
/// the result when `f` succeeds.
pub fn update_settings<T>(
    path: &Path,
    f: impl FnOnce(&mut Settings) -> Result<T>,
) -> Result<T> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let lock_path = lock_path(path);
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("open lock {}", lock_path.display()))?;
    lock.lock_exclusive()
        .with_context(|| format!("lock {}", lock_path.display()))?;

    let result = load_settings(path).and_then(|mut settings| {
        let value = f(&mut settings)?;
        write_settings(path, settings)?;
        Ok(value)
    });
    FileExt::unlock(&lock).with_context(|| format!("unlock {}", lock_path.display()))?;
    result
}

pub fn save_settings(path: &Path, settings: Settings) -> Result<PathBuf> {
    update_settings(path, move |stored| {
        *stored = settings;
        Ok(())
    })?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn bookmark(title: &str, abs: &str) -> Bookmark {
        Bookmark::new(title, format!("nb/{title}"), abs)
    }

    #[test]
    fn add_normalizes_category_and_rejects_exact_duplicates() {
        let mut settings = Settings::default();
        let outcome = settings
            .add(bookmark("a.ipynb", "/x/a.ipynb"), DuplicatePolicy::Reject)
            .expect("add");
        assert_eq!(outcome, AddOutcome::Added("a.ipynb".to_string()));
        assert_eq!(
            settings.get("a.ipynb").map(|b| b.category.as_str()),
            Some(UNCATEGORIZED)
        );

        let err = settings
            .add(bookmark("a.ipynb", "/x/a.ipynb"), DuplicatePolicy::SaveAsNew)
            .expect_err("duplicate");
        assert_eq!(err, SettingsError::Duplicate("a.ipynb".to_string()));
    }

    #[test]
    fn add_with_taken_title_follows_policy() {
        let mut settings = Settings::default();
        settings
            .add(bookmark("a.ipynb", "/x/a.ipynb"), DuplicatePolicy::Reject)
            .expect("add");

        let err = settings
            .add(bookmark("a.ipynb", "/y/a.ipynb"), DuplicatePolicy::Reject)
            .expect_err("taken");
        assert_eq!(err, SettingsError::TitleTaken("a.ipynb".to_string()));

        let outcome = settings
            .add(bookmark("a.ipynb", "/y/a.ipynb"), DuplicatePolicy::SaveAsNew)
            .expect("save as new");
        assert_eq!(outcome, AddOutcome::SavedAsNew("a_(1).ipynb".to_string()));

        let outcome = settings
            .add(bookmark("a.ipynb", "/z/a.ipynb"), DuplicatePolicy::Overwrite)
            .expect("overwrite");
        assert_eq!(outcome, AddOutcome::Overwritten("a.ipynb".to_string()));
        assert_eq!(
            settings.get("a.ipynb").map(|b| b.abs_path.as_str()),
            Some("/z/a.ipynb")
        );
        let titles: Vec<&str> = settings.bookmarks.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(titles, vec!["a.ipynb", "a_(1).ipynb"]);
    }

    #[test]
    fn save_as_new_without_extension_skips_taken_titles() {
        let mut settings = Settings::default();
        settings
            .add(bookmark("notes", "/x/notes"), DuplicatePolicy::Reject)
            .expect("add");
        settings
            .add(bookmark("notes_(1)", "/q/other"), DuplicatePolicy::Reject)
            .expect("add");

        let outcome = settings
            .add(bookmark("notes", "/y/notes"), DuplicatePolicy::SaveAsNew)
            .expect("save as new");
        assert_eq!(outcome.title(), "notes_(2)");
    }

    #[test]
    fn delete_category_moves_members_to_uncategorized() {
        let mut settings = Settings::default();
        settings
            .add(
                bookmark("a", "/x/a").with_category("work"),
                DuplicatePolicy::Reject,
            )
            .expect("add");
        settings
            .add(bookmark("b", "/x/b"), DuplicatePolicy::Reject)
            .expect("add");
        assert_eq!(settings.categories(), vec![UNCATEGORIZED, "work"]);

        assert_eq!(settings.delete_category("work"), 1);
        assert_eq!(settings.categories(), vec![UNCATEGORIZED]);
        assert_eq!(settings.delete_category(UNCATEGORIZED), 0);
    }

    #[test]
    fn import_skips_existing_titles() {
        let mut settings = Settings::from_bookmarks(vec![bookmark("a", "/x/a")]);
        let other = Settings::from_bookmarks(vec![bookmark("a", "/y/a"), bookmark("b", "/y/b")]);

        let report = settings.import(other);
        assert_eq!(report.imported, vec!["b".to_string()]);
        assert_eq!(report.skipped, vec!["a".to_string()]);
        assert_eq!(settings.get("a").map(|b| b.abs_path.as_str()), Some("/x/a"));
    }

    #[test]
    fn import_rekeys_records_by_pair_title() {
        let mut settings = Settings::from_bookmarks(vec![bookmark("a", "/x/a")]);
        let other = Settings {
            bookmarks: vec![
                ("b".to_string(), bookmark("a", "/y/b")),
                ("  ".to_string(), bookmark("blank", "/y/blank")),
            ],
            updated_at: None,
        };

        let report = settings.import(other);
        assert_eq!(report.imported, vec!["b".to_string()]);
        let imported = settings.get("b").expect("imported");
        assert_eq!(imported.title, "b");
        assert_eq!(imported.category, UNCATEGORIZED);

        settings.replace_bookmarks(settings.bookmarks());
        let titles: Vec<&str> = settings.bookmarks.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
    }

    #[test]
    fn same_bookmarks_ignores_order() {
        let a = Settings::from_bookmarks(vec![bookmark("a", "/x/a"), bookmark("b", "/x/b")]);
        let b = Settings::from_bookmarks(vec![bookmark("b", "/x/b"), bookmark("a", "/x/a")]);
        assert!(same_bookmarks(&a, &b));

        let c = Settings::from_bookmarks(vec![bookmark("a", "/x/a")]);
        assert!(!same_bookmarks(&a, &c));
    }

    #[test]
    fn blob_uses_title_record_pairs() {
        let settings = Settings::from_bookmarks(vec![bookmark("a", "/x/a")]);
        let value = serde_json::to_value(&settings).expect("serialize");
        assert_eq!(value["bookmarks"][0][0], "a");
        assert_eq!(value["bookmarks"][0][1]["absPath"], "/x/a");
    }

    #[test]
    fn save_and_load_round_trip_through_lock() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("nested").join("settings.json");

        assert_eq!(load_settings(&path).expect("load missing"), Settings::default());

        let settings = Settings::from_bookmarks(vec![bookmark("a", "/x/a")]);
        save_settings(&path, settings.clone()).expect("save");
        let loaded = load_settings(&path).expect("load");
        assert_eq!(loaded.bookmarks, settings.bookmarks);
        assert!(loaded.updated_at.is_some());

        let removed = update_settings(&path, |stored| Ok(stored.remove("a")?)).expect("remove");
        assert_eq!(removed.title, "a");
        assert!(load_settings(&path).expect("load").bookmarks.is_empty());
    }

    #[test]
    fn failed_update_leaves_file_untouched() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("settings.json");
        save_settings(&path, Settings::from_bookmarks(vec![bookmark("a", "/x/a")])).expect("save");

        let result = update_settings(&path, |stored| Ok(stored.remove("missing")?));
        assert!(result.is_err());
        assert_eq!(load_settings(&path).expect("load").bookmarks.len(), 1);
    }
}
