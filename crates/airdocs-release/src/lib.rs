mod error;
mod fetch;
mod github;
mod http;
mod manifest;
mod source;

pub use error::{CheckError, FetchError};
pub use fetch::{download, Download};
pub use github::{
    parse_checksum_file, parse_github_release, GithubReleaseDocument, GithubSource,
    DEFAULT_GITHUB_API,
};
pub use http::{build_http_client, HttpSettings};
pub use manifest::{parse_manifest, ManifestSource};
pub use source::ReleaseSource;

#[cfg(test)]
mod tests;
