use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("sha256 mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("malformed sha256 digest '{value}': expected 64 hex characters")]
    InvalidDigest { value: String },
    #[error("no sha256 published for {path} and digests are required")]
    DigestRequired { path: PathBuf },
    #[error("failed to read {path} for hashing")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Whether a release without a published digest may be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestPolicy {
    #[default]
    AllowMissing,
    Require,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestCheck {
    Verified { sha256: String },
    Skipped,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Checks `path` against `expected`. A missing digest skips the check.
pub fn verify(path: &Path, expected: Option<&str>) -> Result<(), IntegrityError> {
    verify_with_policy(path, expected, DigestPolicy::AllowMissing).map(|_| ())
}

pub fn verify_with_policy(
    path: &Path,
    expected: Option<&str>,
    policy: DigestPolicy,
) -> Result<DigestCheck, IntegrityError> {
    let expected = expected.map(str::trim).filter(|value| !value.is_empty());
    let Some(expected) = expected else {
        if policy == DigestPolicy::Require {
            return Err(IntegrityError::DigestRequired {
                path: path.to_path_buf(),
            });
        }
        warn!(path = %path.display(), "sha256 not provided; skipping integrity check");
        return Ok(DigestCheck::Skipped);
    };

    if expected.len() != 64 || hex::decode(expected).is_err() {
        return Err(IntegrityError::InvalidDigest {
            value: expected.to_string(),
        });
    }

    let actual = digest_file(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(IntegrityError::DigestMismatch {
            path: path.to_path_buf(),
            expected: expected.to_ascii_lowercase(),
            actual,
        });
    }

    debug!(path = %path.display(), sha256 = %actual, "sha256 verified");
    Ok(DigestCheck::Verified { sha256: actual })
}

fn digest_file(path: &Path) -> Result<String, IntegrityError> {
    let io_error = |source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    digest_reader(&mut reader).map_err(io_error)
}

fn digest_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; READ_BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
