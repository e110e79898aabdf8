use airdocs_core::PendingUpdate;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::fs_utils::{remove_file_if_exists, write_atomic};
use crate::UpdateLayout;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to access pending update record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pending update record {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write pending update record {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// The single-record store describing a staged update awaiting apply.
#[derive(Debug, Clone)]
pub struct PendingLedger {
    path: PathBuf,
}

impl PendingLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_layout(layout: &UpdateLayout) -> Self {
        Self::new(layout.ledger_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Replaces any existing record. Readers observe the old or the new
    /// record, never a partial one.
    pub fn write(&self, pending: &PendingUpdate) -> Result<(), LedgerError> {
        let mut body = serde_json::to_vec_pretty(pending).map_err(|err| LedgerError::Write {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;
        body.push(b'\n');
        write_atomic(&self.path, &body).map_err(|err| LedgerError::Write {
            path: self.path.clone(),
            reason: format!("{err:#}"),
        })
    }

    pub fn try_read(&self) -> Result<Option<PendingUpdate>, LedgerError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| LedgerError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Returns the pending record if one is readable. A corrupt record is
    /// logged and deleted so it cannot wedge later starts.
    pub fn read(&self) -> Option<PendingUpdate> {
        match self.try_read() {
            Ok(pending) => pending,
            Err(err @ LedgerError::Corrupt { .. }) => {
                warn!(error = %err, "discarding unreadable pending update record");
                if let Err(remove_err) = remove_file_if_exists(&self.path) {
                    warn!(
                        path = %self.path.display(),
                        error = %remove_err,
                        "failed to delete corrupt pending update record"
                    );
                }
                None
            }
            Err(err) => {
                warn!(error = %err, "pending update record is unavailable");
                None
            }
        }
    }

    /// Clearing an absent record is a no-op.
    pub fn clear(&self) -> Result<(), LedgerError> {
        remove_file_if_exists(&self.path).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
