use airdocs_core::{parse_version, Channel, ReleaseInfo};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::warn;

use crate::source::get_text;
use crate::{CheckError, ReleaseSource};

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct GithubRelease {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    browser_download_url: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

/// Result of reading a GitHub release document: the release itself and,
/// when published next to the package, the url of its `.sha256` asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubReleaseDocument {
    pub release: ReleaseInfo,
    pub checksum_url: Option<String>,
}

/// GitHub Releases for `OWNER/REPO`. `stable` follows the repository's
/// "latest" release; `latest` takes the newest entry including prereleases.
#[derive(Debug, Clone)]
pub struct GithubSource {
    repo: String,
    api_base: String,
    asset_suffix: String,
    client: Client,
}

impl GithubSource {
    pub fn new(
        repo: impl Into<String>,
        api_base: Option<String>,
        asset_suffix: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            repo: repo.into(),
            api_base: api_base
                .unwrap_or_else(|| DEFAULT_GITHUB_API.to_string())
                .trim_end_matches('/')
                .to_string(),
            asset_suffix: asset_suffix.into(),
            client,
        }
    }

    fn endpoint(&self, channel: Channel) -> String {
        match channel {
            Channel::Stable => format!("{}/repos/{}/releases/latest", self.api_base, self.repo),
            Channel::Latest => format!("{}/repos/{}/releases?per_page=1", self.api_base, self.repo),
        }
    }
}

impl ReleaseSource for GithubSource {
    fn check_latest(&self, channel: Channel) -> Result<ReleaseInfo, CheckError> {
        let url = self.endpoint(channel);
        let body = get_text(&self.client, &url)?;
        let document = parse_github_release(&url, &body, channel, &self.asset_suffix)?;
        let mut release = document.release;

        if let Some(checksum_url) = document.checksum_url {
            match get_text(&self.client, &checksum_url) {
                Ok(text) => release.sha256 = parse_checksum_file(&text),
                Err(err) => {
                    warn!(url = %checksum_url, error = %err, "failed to fetch release checksum; continuing without digest");
                }
            }
        }

        Ok(release)
    }

    fn describe(&self) -> String {
        format!("github {}", self.repo)
    }
}

pub fn parse_github_release(
    url: &str,
    body: &str,
    channel: Channel,
    asset_suffix: &str,
) -> Result<GithubReleaseDocument, CheckError> {
    let malformed = |err: serde_json::Error| CheckError::Malformed {
        url: url.to_string(),
        reason: err.to_string(),
    };
    let release: GithubRelease = match channel {
        Channel::Stable => serde_json::from_str(body).map_err(malformed)?,
        Channel::Latest => {
            let releases: Vec<GithubRelease> = serde_json::from_str(body).map_err(malformed)?;
            releases
                .into_iter()
                .next()
                .ok_or_else(|| CheckError::NoReleases {
                    url: url.to_string(),
                })?
        }
    };

    let tag = release.tag_name.unwrap_or_default();
    let version = parse_version(&tag).map_err(|_| CheckError::InvalidVersion { value: tag.clone() })?;

    let suffix = asset_suffix.to_ascii_lowercase();
    let package = release
        .assets
        .iter()
        .find(|asset| {
            asset
                .name
                .as_deref()
                .is_some_and(|name| name.to_ascii_lowercase().ends_with(&suffix))
        })
        .ok_or_else(|| CheckError::NoAsset {
            suffix: asset_suffix.to_string(),
        })?;
    let package_name = package.name.clone().unwrap_or_default();
    let download_url = package
        .browser_download_url
        .clone()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CheckError::Malformed {
            url: url.to_string(),
            reason: format!("asset '{package_name}' has no download url"),
        })?;

    let checksum_name = format!("{package_name}.sha256");
    let checksum_url = release
        .assets
        .iter()
        .find(|asset| asset.name.as_deref() == Some(checksum_name.as_str()))
        .and_then(|asset| asset.browser_download_url.clone());

    Ok(GithubReleaseDocument {
        release: ReleaseInfo {
            version,
            download_url,
            sha256: None,
            size_bytes: package.size.unwrap_or(0),
            release_date: release.published_at.unwrap_or_default(),
            release_notes: release.body.unwrap_or_default(),
            channel,
        },
        checksum_url,
    })
}

/// Reads a `sha256sum`-style file and returns the first digest on it.
pub fn parse_checksum_file(text: &str) -> Option<String> {
    let token = text.split_whitespace().next()?;
    let is_digest = token.len() == 64 && token.chars().all(|ch| ch.is_ascii_hexdigit());
    is_digest.then(|| token.to_ascii_lowercase())
}
