use std::cmp::Ordering;
use std::path::PathBuf;

use chrono::{TimeZone, Utc};

use super::*;

fn sample_release(sha256: Option<&str>) -> ReleaseInfo {
    ReleaseInfo {
        version: parse_version("1.2.0").expect("must parse"),
        download_url: "https://example.test/airdocs-1.2.0.tar.gz".to_string(),
        sha256: sha256.map(ToOwned::to_owned),
        size_bytes: 1000,
        release_date: "2026-01-08".to_string(),
        release_notes: "Fixes".to_string(),
        channel: Channel::Stable,
    }
}

#[test]
fn parse_version_strips_tag_prefix_and_whitespace() {
    let version = parse_version(" v1.4.2 ").expect("must parse");
    assert_eq!(version.to_string(), "1.4.2");
}

#[test]
fn parse_version_rejects_garbage() {
    assert!(parse_version("one.two").is_err());
    assert!(parse_version("").is_err());
}

#[test]
fn version_comparison_is_numeric_not_lexical() {
    let older = parse_version("1.9.0").expect("must parse");
    let newer = parse_version("1.10.0").expect("must parse");
    assert!(is_newer_version(&older, &newer));
    assert!(!is_newer_version(&newer, &older));
}

#[test]
fn version_comparison_orders_prereleases() {
    let beta_2 = parse_version("1.0.0-beta.2").expect("must parse");
    let beta_11 = parse_version("1.0.0-beta.11").expect("must parse");
    let release = parse_version("1.0.0").expect("must parse");
    assert_eq!(compare_versions(&beta_11, &beta_2), Ordering::Greater);
    assert_eq!(compare_versions(&release, &beta_11), Ordering::Greater);
}

#[test]
fn version_comparison_ignores_build_metadata() {
    let left = parse_version("2.3.5+20260108").expect("must parse");
    let right = parse_version("2.3.5").expect("must parse");
    assert_eq!(compare_versions(&left, &right), Ordering::Equal);
    assert!(!is_newer_version(&right, &left));
}

#[test]
fn channel_round_trips_wire_values() {
    assert_eq!("latest".parse::<Channel>().expect("must parse"), Channel::Latest);
    assert_eq!("stable".parse::<Channel>().expect("must parse"), Channel::Stable);
    assert!("beta".parse::<Channel>().is_err());
    assert_eq!(
        serde_json::to_string(&Channel::Stable).expect("must serialize"),
        "\"stable\""
    );
}

#[test]
fn archive_type_infers_from_url_ignoring_query() {
    assert_eq!(
        ArchiveType::infer_from_url("https://example.test/a.tar.gz?token=1#x"),
        Some(ArchiveType::TarGz)
    );
    assert_eq!(
        ArchiveType::infer_from_url("https://example.test/a.TGZ"),
        Some(ArchiveType::TarGz)
    );
    assert_eq!(
        ArchiveType::infer_from_url("https://example.test/a.tar"),
        Some(ArchiveType::Tar)
    );
    assert_eq!(
        ArchiveType::infer_from_url("https://example.test/v1.2.0/AirDocs-1.2.0.ZIP"),
        Some(ArchiveType::Zip)
    );
    assert_eq!(ArchiveType::infer_from_url("https://example.test/a.exe"), None);
    assert_eq!(ArchiveType::Zip.cache_extension(), "zip");
}

#[test]
fn pending_update_uses_ledger_field_names() {
    let release = sample_release(None);
    let pending = PendingUpdate::from_release(
        &release,
        PathBuf::from("/data/updates/extracted_v1.2.0"),
        Utc.with_ymd_and_hms(2026, 1, 8, 12, 0, 0).single().expect("valid time"),
    );

    let value = serde_json::to_value(&pending).expect("must serialize");
    let object = value.as_object().expect("must be object");
    let mut keys = object.keys().cloned().collect::<Vec<_>>();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "channel",
            "download_timestamp",
            "extracted_path",
            "release_date",
            "release_notes",
            "sha256",
            "size",
            "url",
            "version",
        ]
    );
    assert!(object["sha256"].is_null());
    assert_eq!(object["size"], 1000);
    assert_eq!(object["channel"], "stable");
}

#[test]
fn pending_update_treats_empty_digest_as_absent() {
    let raw = r#"{
        "version": "0.2.4",
        "extracted_path": "/data/updates/extracted_v0.2.4",
        "url": "https://example.test/u.tar.gz",
        "sha256": "",
        "size": 12,
        "channel": "latest",
        "download_timestamp": "2026-01-08T12:00:00.123456Z"
    }"#;
    let pending: PendingUpdate = serde_json::from_str(raw).expect("must parse");
    assert!(pending.sha256.is_none());
    assert!(pending.release_notes.is_empty());
    assert_eq!(pending.channel, Channel::Latest);
}

#[test]
fn release_digest_presence_ignores_blank_values() {
    assert!(!sample_release(None).has_digest());
    assert!(!sample_release(Some("  ")).has_digest());
    assert!(sample_release(Some("abc")).has_digest());
}
