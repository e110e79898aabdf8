use std::fs;
use std::io;
use std::path::{Component, Path};
use std::time::Duration;

use airdocs_core::Channel;
use airdocs_installer::{InstallCheck, UserDataRestore};
use airdocs_release::{build_http_client, GithubSource, HttpSettings, ManifestSource, ReleaseSource};
use airdocs_security::DigestPolicy;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Contents of `updater.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdaterConfig {
    pub channel: Channel,
    pub check_on_startup: bool,
    pub require_digest: bool,
    pub check_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub download_attempts: u32,
    pub retry_delays_secs: Vec<u64>,
    pub entry_executable: String,
    pub required_resources: Vec<String>,
    /// Files in the user data directory that survive an update as-is.
    /// Only consulted when the user data directory sits inside `app_dir`.
    pub restore_files: Vec<String>,
    /// Directories in the user data directory merged back after an update.
    pub restore_dirs: Vec<String>,
    pub asset_suffix: String,
    pub strip_components: usize,
    pub source: Option<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum SourceConfig {
    Manifest {
        url: String,
    },
    Github {
        repo: String,
        #[serde(default)]
        api_base: Option<String>,
    },
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        let restore = UserDataRestore::default();
        Self {
            channel: Channel::Stable,
            check_on_startup: true,
            require_digest: false,
            check_timeout_secs: 10,
            connect_timeout_secs: 30,
            download_timeout_secs: 1800,
            download_attempts: 3,
            retry_delays_secs: vec![1, 2, 4],
            entry_executable: default_entry_executable().to_string(),
            required_resources: Vec::new(),
            restore_files: restore.overwrite_files,
            restore_dirs: restore.merge_dirs,
            asset_suffix: ".zip".to_string(),
            strip_components: 0,
            source: None,
        }
    }
}

fn default_entry_executable() -> &'static str {
    if cfg!(windows) {
        "airdocs.exe"
    } else {
        "airdocs"
    }
}

impl UpdaterConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read updater config: {}", path.display()))
            }
        };

        Self::parse(&raw)
            .with_context(|| format!("failed parsing updater config: {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.download_attempts == 0 {
            return Err(anyhow!("download_attempts must be at least 1"));
        }
        if self.entry_executable.trim().is_empty() {
            return Err(anyhow!("entry_executable must not be empty"));
        }
        for (key, paths) in [
            ("required_resources", &self.required_resources),
            ("restore_files", &self.restore_files),
            ("restore_dirs", &self.restore_dirs),
        ] {
            for path in paths {
                validate_relative(key, path)?;
            }
        }
        validate_relative("entry_executable", &self.entry_executable)?;
        if let Some(SourceConfig::Github { repo, .. }) = &self.source {
            let mut parts = repo.split('/');
            let valid = matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
            );
            if !valid {
                return Err(anyhow!("source.repo must be OWNER/REPO, got '{repo}'"));
            }
        }
        Ok(())
    }

    pub fn install_check(&self) -> InstallCheck {
        InstallCheck {
            entry_executable: self.entry_executable.clone(),
            required_resources: self.required_resources.clone(),
        }
    }

    pub fn user_data_restore(&self) -> UserDataRestore {
        UserDataRestore {
            overwrite_files: self.restore_files.clone(),
            merge_dirs: self.restore_dirs.clone(),
        }
    }

    pub fn digest_policy(&self) -> DigestPolicy {
        if self.require_digest {
            DigestPolicy::Require
        } else {
            DigestPolicy::AllowMissing
        }
    }

    pub fn check_http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.check_timeout_secs),
            ..HttpSettings::default()
        }
    }

    pub fn download_http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.download_timeout_secs),
            ..HttpSettings::default()
        }
    }

    /// Delay before retry number `attempt` (1-based). Past the configured
    /// list the last delay repeats.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let secs = self
            .retry_delays_secs
            .get(index)
            .or_else(|| self.retry_delays_secs.last())
            .copied()
            .unwrap_or(0);
        Duration::from_secs(secs)
    }
}

fn validate_relative(key: &str, value: &str) -> Result<()> {
    let path = Path::new(value);
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if value.trim().is_empty() || escapes {
        return Err(anyhow!(
            "{key} entries must be relative paths inside the installation, got '{value}'"
        ));
    }
    Ok(())
}

/// Builds the configured release index client, or `None` when no source
/// is configured.
pub fn build_release_source(config: &UpdaterConfig) -> Result<Option<Box<dyn ReleaseSource>>> {
    let Some(source) = &config.source else {
        return Ok(None);
    };
    let client = build_http_client(&config.check_http_settings())
        .context("failed to build HTTP client for update checks")?;

    let source: Box<dyn ReleaseSource> = match source {
        SourceConfig::Manifest { url } => Box::new(ManifestSource::new(url.clone(), client)),
        SourceConfig::Github { repo, api_base } => Box::new(GithubSource::new(
            repo.clone(),
            api_base.clone(),
            config.asset_suffix.clone(),
            client,
        )),
    };
    Ok(Some(source))
}
