use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::reconcile::Reconciler;
use crate::scratch::{ScratchAreaManager, DEFAULT_MAX_COPY_BYTES, DEFAULT_SCRATCH_DIR};
use crate::sync::SyncEngine;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("scratch_dir must be a single directory name, got {0:?}")]
    InvalidScratchDir(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookmarksConfig {
    /// Name of the hidden scratch directory created under the workspace root.
    pub scratch_dir: Option<String>,
    /// Largest file or folder (in bytes) that will be copied into the scratch area.
    pub max_copy_bytes: Option<u64>,
    /// Location of the settings blob. Relative paths resolve against the
    /// directory holding the config file that set it.
    pub settings_path: Option<String>,
}

/// Effective settings after layering project, global and built-in values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub scratch_dir: String,
    pub scratch_dir_source: &'static str,
    pub max_copy_bytes: u64,
    pub max_copy_bytes_source: &'static str,
    pub settings_path: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn scratch_manager(&self) -> ScratchAreaManager {
        ScratchAreaManager::new(self.scratch_dir.clone(), self.max_copy_bytes)
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.scratch_manager())
    }

    pub fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(self.max_copy_bytes)
    }
}

pub fn config_filename_candidates() -> [&'static str; 2] {
    [".bookmarks.toml", ".bookmarksrc"]
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(".bookmarks.toml")
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        let trimmed = profile.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

pub fn resolve_bookmarks_home_dir() -> Option<PathBuf> {
    if let Ok(value) = std::env::var("BOOKMARKS_HOME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir().map(|home| home.join(".bookmarks"))
}

pub fn global_config_path() -> Option<PathBuf> {
    resolve_bookmarks_home_dir().map(|home| home.join("config.toml"))
}

pub fn default_settings_path() -> Option<PathBuf> {
    resolve_bookmarks_home_dir().map(|home| home.join("settings.json"))
}

fn read_config_file(path: &Path) -> Option<BookmarksConfig> {
    if !path.is_file() {
        return None;
    }
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable config");
            return None;
        }
    };
    match toml::from_str::<BookmarksConfig>(&text) {
        Ok(config) => Some(config),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unparseable config");
            None
        }
    }
}

/// The project config file in use: the first candidate present, else `.bookmarks.toml`.
pub fn project_config_path(root: &Path) -> PathBuf {
    config_filename_candidates()
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| config_path(root))
}

pub fn load_config(root: &Path) -> Option<BookmarksConfig> {
    config_filename_candidates()
        .iter()
        .find_map(|name| read_config_file(&root.join(name)))
}

pub fn load_global_config() -> Option<BookmarksConfig> {
    read_config_file(&global_config_path()?)
}

/// Applies `f` to the project config and writes it back. The file is left
/// untouched when the result names an invalid scratch directory.
pub fn update_project_config(
    root: &Path,
    f: impl FnOnce(&mut BookmarksConfig),
) -> Result<PathBuf, ConfigError> {
    let path = project_config_path(root);
    let mut config = if path.is_file() {
        toml::from_str::<BookmarksConfig>(&fs::read_to_string(&path)?)?
    } else {
        BookmarksConfig::default()
    };
    f(&mut config);
    if let Some(name) = config.scratch_dir.as_deref() {
        if !is_valid_scratch_dir(name.trim()) {
            return Err(ConfigError::InvalidScratchDir(name.to_string()));
        }
    }
    let body = toml::to_string_pretty(&config)?;
    fs::write(&path, body)?;
    Ok(path)
}

fn is_valid_scratch_dir(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

pub fn resolve_config(root: &Path) -> ResolvedConfig {
    let project = load_config(root);
    let global = load_global_config();
    let layers = [
        (project.as_ref(), "project", Some(root.to_path_buf())),
        (global.as_ref(), "global", resolve_bookmarks_home_dir()),
    ];

    let mut resolved = ResolvedConfig {
        scratch_dir: DEFAULT_SCRATCH_DIR.to_string(),
        scratch_dir_source: "default",
        max_copy_bytes: DEFAULT_MAX_COPY_BYTES,
        max_copy_bytes_source: "default",
        settings_path: None,
    };

    for (config, source, _) in layers.iter().rev() {
        let Some(config) = config else {
            continue;
        };
        if let Some(name) = config.scratch_dir.as_deref().map(str::trim) {
            if is_valid_scratch_dir(name) {
                resolved.scratch_dir = name.to_string();
                resolved.scratch_dir_source = *source;
            } else {
                warn!(scratch_dir = name, source = *source, "ignoring invalid scratch_dir");
            }
        }
        if let Some(limit) = config.max_copy_bytes {
            resolved.max_copy_bytes = limit;
            resolved.max_copy_bytes_source = *source;
        }
    }

    resolved.settings_path = layers
        .iter()
        .find_map(|(config, _, base)| {
            let value = (*config)?.settings_path.as_deref()?.trim();
            if value.is_empty() {
                return None;
            }
            let path = PathBuf::from(value);
            match base {
                Some(base) if path.is_relative() => Some(base.join(path)),
                _ => Some(path),
            }
        })
        .or_else(default_settings_path);

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
        let _guard = crate::test_env::lock();
        f()
    }

    struct EnvGuard {
        bookmarks_home: Option<OsString>,
    }

    impl EnvGuard {
        fn capture() -> Self {
            Self {
                bookmarks_home: std::env::var_os("BOOKMARKS_HOME"),
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = self.bookmarks_home.as_ref() {
                std::env::set_var("BOOKMARKS_HOME", value);
            } else {
                std::env::remove_var("BOOKMARKS_HOME");
            }
        }
    }

    #[test]
    fn update_project_config_merges_into_existing_file() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(temp.path().join(".bookmarksrc"), "max_copy_bytes = 4096\n").expect("rc");

        let path = update_project_config(temp.path(), |config| {
            config.scratch_dir = Some(".scratch".to_string());
        })
        .expect("update");
        assert_eq!(path, temp.path().join(".bookmarksrc"));

        let loaded = load_config(temp.path()).expect("load config");
        assert_eq!(
            loaded,
            BookmarksConfig {
                scratch_dir: Some(".scratch".to_string()),
                max_copy_bytes: Some(4096),
                settings_path: None,
            }
        );
    }

    #[test]
    fn update_project_config_rejects_nested_scratch_dir() {
        let temp = TempDir::new().expect("tempdir");
        let err = update_project_config(temp.path(), |config| {
            config.scratch_dir = Some("a/b".to_string());
        })
        .expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidScratchDir(_)));
        assert!(!temp.path().join(".bookmarks.toml").exists());
    }

    #[test]
    fn unparseable_global_config_is_skipped() {
        with_env_lock(|| {
            let _env = EnvGuard::capture();
            let root = TempDir::new().expect("root tempdir");
            let home = TempDir::new().expect("home tempdir");
            std::env::set_var("BOOKMARKS_HOME", home.path());
            fs::write(home.path().join("config.toml"), "scratch_dir = [").expect("global");

            assert_eq!(load_global_config(), None);
            let resolved = resolve_config(root.path());
            assert_eq!(resolved.scratch_dir_source, "default");
        });
    }

    #[test]
    fn resolve_prefers_project_over_global_then_default() {
        with_env_lock(|| {
            let _env = EnvGuard::capture();
            let root = TempDir::new().expect("root tempdir");
            let home = TempDir::new().expect("home tempdir");
            std::env::set_var("BOOKMARKS_HOME", home.path());

            let resolved = resolve_config(root.path());
            assert_eq!(resolved.scratch_dir, ".tmp");
            assert_eq!(resolved.scratch_dir_source, "default");
            assert_eq!(
                resolved.settings_path,
                Some(home.path().join("settings.json"))
            );

            fs::write(
                home.path().join("config.toml"),
                "scratch_dir = \".global\"\nmax_copy_bytes = 10\n",
            )
            .expect("global config");
            let resolved = resolve_config(root.path());
            assert_eq!(resolved.scratch_dir, ".global");
            assert_eq!(resolved.scratch_dir_source, "global");
            assert_eq!(resolved.max_copy_bytes, 10);

            fs::write(
                root.path().join(".bookmarks.toml"),
                "scratch_dir = \".project\"\nsettings_path = \"bm.json\"\n",
            )
            .expect("project config");
            let resolved = resolve_config(root.path());
            assert_eq!(resolved.scratch_dir, ".project");
            assert_eq!(resolved.scratch_dir_source, "project");
            assert_eq!(resolved.max_copy_bytes, 10);
            assert_eq!(resolved.max_copy_bytes_source, "global");
            assert_eq!(resolved.settings_path, Some(root.path().join("bm.json")));
        });
    }

    #[test]
    fn invalid_scratch_dir_falls_back() {
        with_env_lock(|| {
            let _env = EnvGuard::capture();
            let root = TempDir::new().expect("root tempdir");
            let home = TempDir::new().expect("home tempdir");
            std::env::set_var("BOOKMARKS_HOME", home.path());
            fs::write(
                root.path().join(".bookmarks.toml"),
                "scratch_dir = \"../outside\"\n",
            )
            .expect("project config");

            let resolved = resolve_config(root.path());
            assert_eq!(resolved.scratch_dir, ".tmp");
            assert_eq!(resolved.scratch_dir_source, "default");
        });
    }
}
