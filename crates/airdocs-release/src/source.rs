use airdocs_core::{Channel, ReleaseInfo};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;

use crate::CheckError;

/// A remote index that can name the newest release on a channel.
pub trait ReleaseSource: Send + Sync {
    fn check_latest(&self, channel: Channel) -> Result<ReleaseInfo, CheckError>;

    fn describe(&self) -> String;
}

pub(crate) fn get_text(client: &Client, url: &str) -> Result<String, CheckError> {
    debug!(url, "querying release index");
    let response = client
        .get(url)
        .send()
        .map_err(|err| CheckError::from_request(url, err))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(CheckError::NoReleases {
            url: url.to_string(),
        });
    }
    if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(CheckError::RateLimited {
            url: url.to_string(),
        });
    }
    if !status.is_success() {
        return Err(CheckError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response
        .text()
        .map_err(|err| CheckError::from_request(url, err))
}
