use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{ArchiveType, Channel};

/// Metadata for the newest release published on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: Version,
    pub download_url: String,
    pub sha256: Option<String>,
    pub size_bytes: u64,
    pub release_date: String,
    pub release_notes: String,
    pub channel: Channel,
}

impl ReleaseInfo {
    pub fn archive_type(&self) -> Option<ArchiveType> {
        ArchiveType::infer_from_url(&self.download_url)
    }

    pub fn has_digest(&self) -> bool {
        self.sha256
            .as_deref()
            .is_some_and(|digest| !digest.trim().is_empty())
    }
}
