use anyhow::{Context, Result};
use airdocs_core::ArchiveType;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Where the live installation and the per-user update state live.
/// Passed explicitly to everything that touches either tree. Both paths
/// are stored absolute so records written under one working directory
/// resolve the same way under another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLayout {
    app_dir: PathBuf,
    user_dir: PathBuf,
}

impl UpdateLayout {
    pub fn new(app_dir: impl Into<PathBuf>, user_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: absolute_path(app_dir.into()),
            user_dir: absolute_path(user_dir.into()),
        }
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    /// Sibling of `app_dir` holding the previous installation while an
    /// apply is in flight.
    pub fn app_dir_old(&self) -> PathBuf {
        let name = self
            .app_dir
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| "app".to_string());
        self.app_dir.with_file_name(format!("{name}_old"))
    }

    pub fn updates_dir(&self) -> PathBuf {
        self.user_dir.join("updates")
    }

    pub fn package_path(&self, version: &str, archive_type: ArchiveType) -> PathBuf {
        self.updates_dir().join(format!(
            "update_{version}.{}",
            archive_type.cache_extension()
        ))
    }

    pub fn extracted_dir(&self, version: &str) -> PathBuf {
        self.updates_dir().join(format!("extracted_v{version}"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.user_dir.join(".pending_update")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.user_dir.join(".apply_journal")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.user_dir.join("logs")
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join("updater.log")
    }

    pub fn history_path(&self) -> PathBuf {
        self.user_dir.join("update_history.jsonl")
    }

    pub fn database_path(&self) -> PathBuf {
        self.user_dir.join("awb_dispatcher.db")
    }

    pub fn config_path(&self) -> PathBuf {
        self.user_dir.join("updater.toml")
    }

    /// A staged tree recorded relative to the user directory is resolved
    /// against it.
    pub fn resolve_user_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.user_dir.join(path)
        }
    }

    /// Maps a path inside `app_dir` to the same location under
    /// `app_dir_old`. Paths outside `app_dir` are returned unchanged.
    pub fn rebase_into_old(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.app_dir) {
            Ok(rel) => self.app_dir_old().join(rel),
            Err(_) => path.to_path_buf(),
        }
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.user_dir.clone(), self.updates_dir(), self.logs_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Anchors `path` at the working directory and folds `.` and `..`
/// lexically. Falls back to the lexical form if the working directory
/// cannot be read.
fn absolute_path(path: PathBuf) -> PathBuf {
    let anchored = std::path::absolute(&path).unwrap_or(path);
    let mut normalized = PathBuf::new();
    for component in anchored.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) && normalized.pop();
                if !popped && !normalized.has_root() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

pub fn default_user_dir() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows user data directory")?;
        return Ok(PathBuf::from(app_data).join("AirDocs"));
    }

    let home =
        std::env::var("HOME").context("HOME is not set; cannot resolve user data directory")?;
    Ok(PathBuf::from(home).join(".airdocs"))
}
