use std::collections::BTreeMap;

use airdocs_core::{parse_version, Channel, ReleaseInfo};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::source::get_text;
use crate::{CheckError, ReleaseSource};

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    version: String,
    url: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    release_notes: Option<String>,
}

/// A JSON document keyed by channel name, each entry describing the
/// current build on that channel.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    url: String,
    client: Client,
}

impl ManifestSource {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

impl ReleaseSource for ManifestSource {
    fn check_latest(&self, channel: Channel) -> Result<ReleaseInfo, CheckError> {
        let body = get_text(&self.client, &self.url)?;
        parse_manifest(&self.url, &body, channel)
    }

    fn describe(&self) -> String {
        format!("manifest {}", self.url)
    }
}

pub fn parse_manifest(url: &str, body: &str, channel: Channel) -> Result<ReleaseInfo, CheckError> {
    let mut channels: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(body).map_err(|err| CheckError::Malformed {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

    let raw_entry = channels
        .remove(channel.as_str())
        .filter(|value| !value.is_null())
        .ok_or(CheckError::ChannelMissing { channel })?;
    let entry: ManifestEntry =
        serde_json::from_value(raw_entry).map_err(|err| CheckError::Malformed {
            url: url.to_string(),
            reason: format!("channel '{channel}': {err}"),
        })?;

    let version = parse_version(&entry.version).map_err(|_| CheckError::InvalidVersion {
        value: entry.version.clone(),
    })?;
    if entry.url.trim().is_empty() {
        return Err(CheckError::Malformed {
            url: url.to_string(),
            reason: format!("channel '{channel}' has an empty download url"),
        });
    }

    Ok(ReleaseInfo {
        version,
        download_url: entry.url,
        sha256: entry.sha256.filter(|digest| !digest.trim().is_empty()),
        size_bytes: entry.size.unwrap_or(0),
        release_date: entry.release_date.unwrap_or_default(),
        release_notes: entry.release_notes.unwrap_or_default(),
        channel,
    })
}
