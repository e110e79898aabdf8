use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    Auto,
    Manual,
}

impl InstallMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// One apply attempt. Records are appended once and never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateHistoryRecord {
    pub version: String,
    pub previous_version: String,
    pub channel: Channel,
    pub install_method: InstallMethod,
    pub download_size: u64,
    pub download_duration: u64,
    pub install_success: bool,
    pub error_message: Option<String>,
    pub rollback_occurred: bool,
    pub installed_at: DateTime<Utc>,
}
