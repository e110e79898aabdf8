use std::io;
use std::path::PathBuf;

use airdocs_installer::{ExtractionError, LedgerError};
use airdocs_release::FetchError;
use airdocs_security::IntegrityError;
use thiserror::Error;

use crate::UpdateState;

/// Why staging an update stopped. Every variant leaves the updater idle
/// with no pending record and no partial artifacts.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("another update is already in progress (state: {state})")]
    Busy { state: UpdateState },
    #[error("update cancelled")]
    Cancelled,
    #[error("release package {url} is not a supported archive")]
    UnsupportedPackage { url: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
