use std::io;
use std::path::PathBuf;

use airdocs_core::Channel;
use thiserror::Error;

/// Release-index failures. None of these are fatal to the application; the
/// caller reports them as "no update available".
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),
    #[error("release index request failed: {url}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("release index request timed out: {url}")]
    Timeout { url: String },
    #[error("release index rate limited: {url}")]
    RateLimited { url: String },
    #[error("no releases published at {url}")]
    NoReleases { url: String },
    #[error("release index returned http {status}: {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("malformed release index from {url}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("channel '{channel}' not present in release index")]
    ChannelMissing { channel: Channel },
    #[error("release index advertises invalid version '{value}'")]
    InvalidVersion { value: String },
    #[error("no release asset ending with '{suffix}'")]
    NoAsset { suffix: String },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build http client")]
    Client(#[source] reqwest::Error),
    #[error("download request failed: {url}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download timed out: {url}")]
    Timeout { url: String },
    #[error("download returned http {status}: {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("failed reading download body from {url}")]
    Read {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("failed writing download to {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("download from {url} ended early: expected {expected} bytes, received {actual}")]
    Truncated {
        url: String,
        expected: u64,
        actual: u64,
    },
    #[error("failed to move completed download into place: {path}")]
    Finalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    pub(crate) fn from_request(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout {
                url: url.to_string(),
            };
        }
        Self::Request {
            url: url.to_string(),
            source,
        }
    }

    /// Transport failures worth another attempt. Local disk errors and
    /// client-side HTTP statuses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Timeout { .. } | Self::Read { .. } => true,
            Self::Truncated { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Client(_) | Self::Write { .. } | Self::Finalize { .. } => false,
        }
    }
}

impl CheckError {
    pub(crate) fn from_request(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout {
                url: url.to_string(),
            };
        }
        Self::Network {
            url: url.to_string(),
            source,
        }
    }
}
