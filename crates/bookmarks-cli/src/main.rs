use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use bookmarks_core::bookmark::Bookmark;
use bookmarks_core::config::{resolve_config, update_project_config, ResolvedConfig};
use bookmarks_core::reconcile::ReconcileSummary;
use bookmarks_core::resolver::relative_to;
use bookmarks_core::settings::{
    load_settings, same_bookmarks, update_settings, DuplicatePolicy, Settings,
};
use bookmarks_core::sync::{find_for_saved_path, get_absolute_path};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod version;

#[derive(Parser)]
#[command(
    name = "bookmarks",
    version,
    long_version = version::FULL,
    about = "Keep bookmarked files usable from any workspace root"
)]
struct Cli {
    /// Workspace root the bookmarks are reconciled against
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Settings blob to read and write (defaults to the configured path)
    #[arg(long, global = true, env = "BOOKMARKS_SETTINGS")]
    settings: Option<PathBuf>,
    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Bookmark a file or folder
    Add {
        path: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, value_enum, default_value_t = OnDuplicate::Reject)]
        on_duplicate: OnDuplicate,
    },
    /// Delete a bookmark
    Remove { title: String },
    /// List bookmarks in stored order
    List,
    /// Recompute active paths against the root and persist them
    Reconcile,
    /// Copy a working copy back to the bookmark's absolute path
    Sync {
        title: String,
        /// Copy from this file instead of the working copy
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Sync the bookmark whose working copy is the file just saved
    Autosync {
        /// Root-relative path of the saved file
        saved_path: String,
    },
    /// Compare a working copy with its absolute path
    Status { title: String },
    /// Print the absolute form of a path relative to the root
    AbsPath { path: String },
    /// Merge bookmarks from another settings blob
    Import { file: PathBuf },
    /// Write the settings blob to a file or stdout
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete a category, moving its bookmarks to Uncategorized
    CategoryDelete { name: String },
    /// Show or change the project configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration and where each value came from
    Show,
    /// Write values into the project config file
    Set {
        #[arg(long)]
        scratch_dir: Option<String>,
        #[arg(long)]
        max_copy_bytes: Option<u64>,
        #[arg(long)]
        settings_path: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OnDuplicate {
    Reject,
    Overwrite,
    SaveAsNew,
}

impl From<OnDuplicate> for DuplicatePolicy {
    fn from(value: OnDuplicate) -> Self {
        match value {
            OnDuplicate::Reject => DuplicatePolicy::Reject,
            OnDuplicate::Overwrite => DuplicatePolicy::Overwrite,
            OnDuplicate::SaveAsNew => DuplicatePolicy::SaveAsNew,
        }
    }
}

struct Invocation {
    root: PathBuf,
    config: ResolvedConfig,
    settings_path: PathBuf,
    json: bool,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("BOOKMARKS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn normalize_root(root: &Path) -> Result<PathBuf> {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()
            .context("resolve current dir")?
            .join(root)
    };
    Ok(absolute.canonicalize().unwrap_or(absolute))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };
    if let Command::Version = command {
        println!("bookmarks {}", version::FULL);
        return Ok(());
    }

    let root = normalize_root(&cli.root)?;
    let config = resolve_config(&root);
    let settings_path = cli
        .settings
        .clone()
        .or_else(|| config.settings_path.clone())
        .ok_or_else(|| {
            anyhow!("Unable to resolve settings path; pass --settings or set BOOKMARKS_HOME")
        })?;
    let ctx = Invocation {
        root,
        config,
        settings_path,
        json: cli.json,
    };

    match command {
        Command::Add {
            path,
            title,
            category,
            on_duplicate,
        } => add(&ctx, &path, title, category, on_duplicate.into()),
        Command::Remove { title } => remove(&ctx, &title),
        Command::List => list(&ctx),
        Command::Reconcile => reconcile(&ctx),
        Command::Sync { title, source } => sync(&ctx, &title, source.as_deref()),
        Command::Autosync { saved_path } => autosync(&ctx, &saved_path),
        Command::Status { title } => status(&ctx, &title),
        Command::AbsPath { path } => abs_path(&ctx, &path),
        Command::Import { file } => import(&ctx, &file),
        Command::Export { output } => export(&ctx, output.as_deref()),
        Command::CategoryDelete { name } => category_delete(&ctx, &name),
        Command::Config { action } => self::config(&ctx, action),
        Command::Version => Ok(()),
    }
}

fn add(
    ctx: &Invocation,
    path: &str,
    title: Option<String>,
    category: Option<String>,
    policy: DuplicatePolicy,
) -> Result<()> {
    let info = get_absolute_path(&ctx.root, path)?;
    let abs = PathBuf::from(&info.abs_path);
    let base_path = if Path::new(path.trim()).is_absolute() {
        relative_to(&ctx.root, &abs).unwrap_or_default()
    } else {
        info.active_path.clone()
    };
    let title = title
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            abs.file_name()
                .map(|name| name.to_string_lossy().to_string())
        })
        .ok_or_else(|| anyhow!("Unable to derive a title from {path}; pass --title"))?;
    let bookmark = Bookmark::new(title, base_path, info.abs_path.clone())
        .with_category(category.unwrap_or_default());

    let reconciler = ctx.config.reconciler();
    let (outcome, bookmark) = update_settings(&ctx.settings_path, |settings| {
        let outcome = settings.add(bookmark, policy)?;
        let mut bookmarks = settings.bookmarks();
        if let Some(stored) = bookmarks
            .iter_mut()
            .find(|stored| stored.title == outcome.title())
        {
            *stored = reconciler.reconcile(&ctx.root, stored.clone());
        }
        settings.replace_bookmarks(bookmarks);
        let bookmark = settings
            .get(outcome.title())
            .cloned()
            .ok_or_else(|| anyhow!("bookmark {} vanished while saving", outcome.title()))?;
        Ok((outcome, bookmark))
    })?;

    if ctx.json {
        return print_json(&json!({ "ok": true, "outcome": outcome, "bookmark": bookmark }));
    }
    println!("{} -> {}", bookmark.title, describe(&bookmark));
    Ok(())
}

fn remove(ctx: &Invocation, title: &str) -> Result<()> {
    let removed = update_settings(&ctx.settings_path, |settings| Ok(settings.remove(title)?))?;
    if ctx.json {
        return print_json(&json!({ "ok": true, "removed": removed }));
    }
    println!("Removed {}", removed.title);
    Ok(())
}

fn list(ctx: &Invocation) -> Result<()> {
    let settings = load_settings(&ctx.settings_path)?;
    if ctx.json {
        return print_json(&json!({
            "bookmarks": settings.bookmarks(),
            "categories": settings.categories(),
        }));
    }
    if settings.bookmarks.is_empty() {
        println!("No bookmarks.");
        return Ok(());
    }
    for (_, bookmark) in &settings.bookmarks {
        println!(
            "{}\t[{}]\t{}",
            bookmark.title,
            bookmark.category,
            describe(bookmark)
        );
    }
    Ok(())
}

fn describe(bookmark: &Bookmark) -> String {
    if bookmark.disabled {
        match &bookmark.diagnostic {
            Some(reason) => format!("disabled ({reason})"),
            None => format!("disabled (make sure {} is accessible)", bookmark.abs_path),
        }
    } else {
        bookmark.active_path.clone()
    }
}

fn reconcile(ctx: &Invocation) -> Result<()> {
    let reconciler = ctx.config.reconciler();
    let (before, after) = update_settings(&ctx.settings_path, |settings| {
        let before = settings.clone();
        let reconciled = reconciler.reconcile_all(&ctx.root, settings.bookmarks());
        settings.replace_bookmarks(reconciled);
        Ok((before, settings.clone()))
    })?;
    let bookmarks = after.bookmarks();
    let summary = ReconcileSummary::from_bookmarks(&bookmarks);
    let changed = !same_bookmarks(&before, &after);

    if ctx.json {
        return print_json(&json!({
            "ok": true,
            "root": ctx.root.display().to_string(),
            "changed": changed,
            "summary": summary,
            "bookmarks": bookmarks,
        }));
    }
    for bookmark in &bookmarks {
        println!("{}\t{}", bookmark.title, describe(bookmark));
    }
    println!(
        "{} direct, {} working copies, {} disabled",
        summary.direct, summary.working_copy, summary.disabled
    );
    Ok(())
}

fn find_bookmark(ctx: &Invocation, title: &str) -> Result<Bookmark> {
    let settings = load_settings(&ctx.settings_path)?;
    settings
        .get(title)
        .cloned()
        .ok_or_else(|| anyhow!("No bookmark named {title:?}"))
}

fn sync(ctx: &Invocation, title: &str, source: Option<&Path>) -> Result<()> {
    let bookmark = find_bookmark(ctx, title)?;
    let engine = ctx.config.sync_engine();
    let result = match source {
        Some(source) => engine.sync_from(source, &bookmark),
        None => engine.sync(&ctx.root, &bookmark),
    };
    match result {
        Ok(report) => {
            if ctx.json {
                return print_json(&json!({ "ok": true, "report": report }));
            }
            if report.skipped {
                println!("{} already points at {}", report.title, report.destination);
            } else {
                println!(
                    "Synced {} ({} bytes) -> {}",
                    report.title, report.bytes, report.destination
                );
            }
            Ok(())
        }
        Err(err) => {
            if ctx.json {
                print_json(&json!({ "ok": false, "reason": err.to_string() }))?;
            }
            Err(anyhow!(err).context(format!("Failed to sync {title}")))
        }
    }
}

fn autosync(ctx: &Invocation, saved_path: &str) -> Result<()> {
    let settings = load_settings(&ctx.settings_path)?;
    let bookmarks = settings.bookmarks();
    let Some(bookmark) = find_for_saved_path(&bookmarks, &ctx.config.scratch_dir, saved_path)
    else {
        if ctx.json {
            return print_json(&json!({ "ok": true, "synced": false }));
        }
        println!("{saved_path} is not a bookmark working copy");
        return Ok(());
    };
    sync(ctx, &bookmark.title, None)
}

fn status(ctx: &Invocation, title: &str) -> Result<()> {
    let bookmark = find_bookmark(ctx, title)?;
    let status = ctx.config.sync_engine().status(&ctx.root, &bookmark)?;
    if ctx.json {
        return print_json(&status);
    }
    let state = if status.in_sync { "in sync" } else { "diverged" };
    println!(
        "{}: {} ({} vs {})",
        status.title, state, status.source, status.destination
    );
    Ok(())
}

fn abs_path(ctx: &Invocation, path: &str) -> Result<()> {
    let info = get_absolute_path(&ctx.root, path)?;
    if ctx.json {
        return print_json(&info);
    }
    println!("{}", info.abs_path);
    Ok(())
}

fn import(ctx: &Invocation, file: &Path) -> Result<()> {
    let incoming = load_settings(file)?;
    let report = update_settings(&ctx.settings_path, |settings| Ok(settings.import(incoming)))?;
    if ctx.json {
        return print_json(&json!({ "ok": true, "import": report }));
    }
    println!(
        "Imported {} bookmarks, skipped {} existing titles",
        report.imported.len(),
        report.skipped.len()
    );
    Ok(())
}

fn export(ctx: &Invocation, output: Option<&Path>) -> Result<()> {
    let settings: Settings = load_settings(&ctx.settings_path)?;
    let raw = serde_json::to_string_pretty(&settings)?;
    match output {
        Some(path) => {
            std::fs::write(path, raw).with_context(|| format!("write {}", path.display()))?;
            if ctx.json {
                print_json(&json!({ "ok": true, "path": path.display().to_string() }))?;
            } else {
                println!(
                    "Exported {} bookmarks to {}",
                    settings.bookmarks.len(),
                    path.display()
                );
            }
        }
        None => println!("{raw}"),
    }
    Ok(())
}

fn config(ctx: &Invocation, action: ConfigCommand) -> Result<()> {
    match action {
        ConfigCommand::Show => {
            if ctx.json {
                return print_json(&ctx.config);
            }
            let config = &ctx.config;
            println!("scratch_dir: {} ({})", config.scratch_dir, config.scratch_dir_source);
            println!(
                "max_copy_bytes: {} ({})",
                config.max_copy_bytes, config.max_copy_bytes_source
            );
            println!("settings_path: {}", ctx.settings_path.display());
            Ok(())
        }
        ConfigCommand::Set {
            scratch_dir,
            max_copy_bytes,
            settings_path,
        } => {
            if scratch_dir.is_none() && max_copy_bytes.is_none() && settings_path.is_none() {
                return Err(anyhow!(
                    "Nothing to set; pass --scratch-dir, --max-copy-bytes or --settings-path"
                ));
            }
            let path = update_project_config(&ctx.root, |config| {
                if scratch_dir.is_some() {
                    config.scratch_dir = scratch_dir;
                }
                if max_copy_bytes.is_some() {
                    config.max_copy_bytes = max_copy_bytes;
                }
                if settings_path.is_some() {
                    config.settings_path = settings_path;
                }
            })?;
            let resolved = resolve_config(&ctx.root);
            if ctx.json {
                return print_json(&json!({
                    "ok": true,
                    "path": path.display().to_string(),
                    "config": resolved,
                }));
            }
            println!("Updated {}", path.display());
            Ok(())
        }
    }
}

fn category_delete(ctx: &Invocation, name: &str) -> Result<()> {
    let moved =
        update_settings(&ctx.settings_path, |settings| Ok(settings.delete_category(name)))?;
    if ctx.json {
        return print_json(&json!({ "ok": true, "category": name, "moved": moved }));
    }
    println!("Deleted category {name}; moved {moved} bookmarks to Uncategorized");
    Ok(())
}
