use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Channel, ReleaseInfo};

/// The staged-but-not-applied update. Serialized field names match the
/// on-disk ledger format written by earlier releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub version: String,
    pub extracted_path: PathBuf,
    #[serde(rename = "url")]
    pub source_url: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub sha256: Option<String>,
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub release_notes: String,
    #[serde(default)]
    pub channel: Channel,
    pub download_timestamp: DateTime<Utc>,
}

impl PendingUpdate {
    pub fn from_release(
        release: &ReleaseInfo,
        extracted_path: PathBuf,
        download_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            version: release.version.to_string(),
            extracted_path,
            source_url: release.download_url.clone(),
            sha256: release.sha256.clone(),
            size_bytes: release.size_bytes,
            release_date: release.release_date.clone(),
            release_notes: release.release_notes.clone(),
            channel: release.channel,
            download_timestamp,
        }
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|digest| !digest.trim().is_empty()))
}
