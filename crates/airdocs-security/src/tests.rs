use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use super::*;

const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

static TEST_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_file(contents: &[u8]) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "airdocs-security-tests-{}-{}",
        std::process::id(),
        TEST_FILE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&path, contents).expect("must write test file");
    path
}

#[test]
fn sha256_hex_matches_known_vectors() {
    assert_eq!(sha256_hex(b""), EMPTY_SHA256);
    assert_eq!(sha256_hex(b"abc"), ABC_SHA256);
}

#[test]
fn verify_accepts_uppercase_digest() {
    let path = test_file(b"abc");
    verify(&path, Some(&ABC_SHA256.to_ascii_uppercase())).expect("uppercase digest must match");
    let _ = fs::remove_file(&path);
}

#[test]
fn verify_hashes_files_larger_than_one_read_buffer() {
    let payload = vec![7_u8; 64 * 1024 * 2 + 17];
    let path = test_file(&payload);
    verify(&path, Some(&sha256_hex(&payload))).expect("streamed digest must match");
    let _ = fs::remove_file(&path);
}

#[test]
fn verify_accepts_unaltered_file_repeatedly() {
    let path = test_file(b"abc");
    verify(&path, Some(ABC_SHA256)).expect("first verification must pass");
    verify(&path, Some(ABC_SHA256)).expect("second verification must pass");
    let _ = fs::remove_file(&path);
}

#[test]
fn verify_rejects_altered_file() {
    let path = test_file(b"abc");
    fs::write(&path, b"abC").expect("must alter file");

    let err = verify(&path, Some(ABC_SHA256)).expect_err("altered file must fail");
    match err {
        IntegrityError::DigestMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, ABC_SHA256);
            assert_ne!(actual, ABC_SHA256);
        }
        other => panic!("unexpected error: {other}"),
    }
    let _ = fs::remove_file(&path);
}

#[test]
fn verify_skips_when_digest_absent() {
    let path = test_file(b"anything");
    verify(&path, None).expect("missing digest must skip");
    verify(&path, Some("   ")).expect("blank digest must skip");
    assert_eq!(
        verify_with_policy(&path, None, DigestPolicy::AllowMissing).expect("must skip"),
        DigestCheck::Skipped
    );
    let _ = fs::remove_file(&path);
}

#[test]
fn verify_with_required_policy_rejects_missing_digest() {
    let path = test_file(b"anything");
    let err = verify_with_policy(&path, None, DigestPolicy::Require)
        .expect_err("strict policy must reject");
    assert!(matches!(err, IntegrityError::DigestRequired { .. }));
    let _ = fs::remove_file(&path);
}

#[test]
fn verify_rejects_malformed_digest() {
    let path = test_file(b"abc");
    let err = verify(&path, Some("zz")).expect_err("malformed digest must fail");
    assert!(matches!(err, IntegrityError::InvalidDigest { .. }));
    let _ = fs::remove_file(&path);
}

#[test]
fn verify_reports_missing_file_as_io_error() {
    let path = std::env::temp_dir().join("airdocs-security-tests-missing-file");
    let err = verify(&path, Some(ABC_SHA256)).expect_err("missing file must fail");
    assert!(matches!(err, IntegrityError::Io { .. }));
}

#[test]
fn verified_check_reports_lowercase_digest() {
    let path = test_file(b"abc");
    let check = verify_with_policy(
        &path,
        Some(&ABC_SHA256.to_ascii_uppercase()),
        DigestPolicy::Require,
    )
    .expect("must verify");
    assert_eq!(
        check,
        DigestCheck::Verified {
            sha256: ABC_SHA256.to_string()
        }
    );
    let _ = fs::remove_file(&path);
}
