use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use airdocs_core::Channel;
use airdocs_security::sha256_hex;

use super::*;
use crate::fetch::part_path_for;

const MANIFEST: &str = r#"{
    "latest": {
        "version": "1.3.0-beta.1",
        "url": "https://example.test/airdocs-1.3.0-beta.1.tar.gz",
        "sha256": "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        "size": 2048,
        "release_date": "2026-02-01",
        "release_notes": "Preview build"
    },
    "stable": {
        "version": "1.2.0",
        "url": "https://example.test/airdocs-1.2.0.tar.gz",
        "sha256": null,
        "size": 1000
    }
}"#;

struct Canned {
    status: &'static str,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Canned {
    fn ok(body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status: "200 OK",
            headers: vec![("Content-Length".to_string(), body.len().to_string())],
            body,
        }
    }

    fn status(status: &'static str) -> Self {
        Self {
            status,
            headers: vec![("Content-Length".to_string(), "0".to_string())],
            body: Vec::new(),
        }
    }

    fn truncated(declared: usize, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: "200 OK",
            headers: vec![("Content-Length".to_string(), declared.to_string())],
            body: body.into(),
        }
    }
}

/// Answers one connection per canned response, in order, then exits.
fn serve<F>(build: F) -> String
where
    F: FnOnce(&str) -> Vec<Canned>,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("must bind test listener");
    let base_url = format!("http://{}", listener.local_addr().expect("must have addr"));
    let responses = build(&base_url);

    thread::spawn(move || {
        for canned in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut request = Vec::new();
            let mut buffer = [0_u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                match stream.read(&mut buffer) {
                    Ok(0) | Err(_) => break,
                    Ok(read) => request.extend_from_slice(&buffer[..read]),
                }
            }

            let mut head = format!("HTTP/1.1 {}\r\nConnection: close\r\n", canned.status);
            for (name, value) in &canned.headers {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&canned.body);
            let _ = stream.flush();
        }
    });

    base_url
}

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "airdocs-release-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("must create test dir");
    path
}

fn test_client() -> reqwest::blocking::Client {
    build_http_client(&HttpSettings {
        request_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        ..HttpSettings::default()
    })
    .expect("must build client")
}

#[test]
fn parse_manifest_selects_requested_channel() {
    let stable = parse_manifest("m", MANIFEST, Channel::Stable).expect("must parse stable");
    assert_eq!(stable.version.to_string(), "1.2.0");
    assert_eq!(stable.size_bytes, 1000);
    assert!(stable.sha256.is_none());
    assert!(stable.release_notes.is_empty());
    assert_eq!(stable.channel, Channel::Stable);

    let latest = parse_manifest("m", MANIFEST, Channel::Latest).expect("must parse latest");
    assert_eq!(latest.version.to_string(), "1.3.0-beta.1");
    assert!(latest.has_digest());
    assert_eq!(latest.release_notes, "Preview build");
}

#[test]
fn parse_manifest_reports_missing_channel() {
    let err = parse_manifest("m", r#"{"latest": null}"#, Channel::Stable)
        .expect_err("missing channel must fail");
    assert!(matches!(
        err,
        CheckError::ChannelMissing {
            channel: Channel::Stable
        }
    ));
}

#[test]
fn parse_manifest_rejects_malformed_documents() {
    let err = parse_manifest("m", "<html>", Channel::Stable).expect_err("html must fail");
    assert!(matches!(err, CheckError::Malformed { .. }));

    let err = parse_manifest("m", r#"{"stable": {"version": "1.0.0"}}"#, Channel::Stable)
        .expect_err("entry without url must fail");
    assert!(matches!(err, CheckError::Malformed { .. }));

    let err = parse_manifest(
        "m",
        r#"{"stable": {"version": "soon", "url": "https://example.test/a.tar.gz"}}"#,
        Channel::Stable,
    )
    .expect_err("bad version must fail");
    assert!(matches!(err, CheckError::InvalidVersion { .. }));
}

#[test]
fn parse_github_release_picks_matching_asset_and_checksum() {
    let body = r#"{
        "tag_name": "v0.3.1",
        "body": "Notes",
        "published_at": "2026-03-01T10:00:00Z",
        "assets": [
            {"name": "airdocs-0.3.1.zip", "browser_download_url": "https://example.test/a.zip", "size": 5},
            {"name": "airdocs-0.3.1.tar.gz", "browser_download_url": "https://example.test/a.tar.gz", "size": 4096},
            {"name": "airdocs-0.3.1.tar.gz.sha256", "browser_download_url": "https://example.test/a.tar.gz.sha256", "size": 90}
        ]
    }"#;
    let document =
        parse_github_release("g", body, Channel::Stable, ".tar.gz").expect("must parse release");
    assert_eq!(document.release.version.to_string(), "0.3.1");
    assert_eq!(document.release.download_url, "https://example.test/a.tar.gz");
    assert_eq!(document.release.size_bytes, 4096);
    assert_eq!(document.release.release_date, "2026-03-01T10:00:00Z");
    assert!(document.release.sha256.is_none());
    assert_eq!(
        document.checksum_url.as_deref(),
        Some("https://example.test/a.tar.gz.sha256")
    );
}

#[test]
fn parse_github_release_latest_channel_reads_list() {
    let body = r#"[{"tag_name": "v0.4.0-rc.1", "assets": [
        {"name": "airdocs.tar.gz", "browser_download_url": "https://example.test/rc.tar.gz"}
    ]}]"#;
    let document =
        parse_github_release("g", body, Channel::Latest, ".tar.gz").expect("must parse list");
    assert_eq!(document.release.version.to_string(), "0.4.0-rc.1");
    assert_eq!(document.release.channel, Channel::Latest);
    assert!(document.checksum_url.is_none());

    let err = parse_github_release("g", "[]", Channel::Latest, ".tar.gz")
        .expect_err("empty list must fail");
    assert!(matches!(err, CheckError::NoReleases { .. }));
}

#[test]
fn parse_github_release_without_package_asset_fails() {
    let body = r#"{"tag_name": "v1.0.0", "assets": []}"#;
    let err = parse_github_release("g", body, Channel::Stable, ".tar.gz")
        .expect_err("missing asset must fail");
    assert!(matches!(err, CheckError::NoAsset { .. }));
}

#[test]
fn parse_checksum_file_accepts_sha256sum_format() {
    let digest = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
    assert_eq!(
        parse_checksum_file(&format!("{digest}  airdocs.tar.gz\n")).as_deref(),
        Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
    assert!(parse_checksum_file("not-a-digest airdocs.tar.gz").is_none());
    assert!(parse_checksum_file("").is_none());
}

#[test]
fn manifest_source_fetches_over_http() {
    let base = serve(|_| vec![Canned::ok(MANIFEST)]);
    let source = ManifestSource::new(format!("{base}/manifest.json"), test_client());
    let release = source
        .check_latest(Channel::Stable)
        .expect("must fetch manifest");
    assert_eq!(release.version.to_string(), "1.2.0");
}

#[test]
fn manifest_source_maps_http_failures() {
    let base = serve(|_| {
        vec![
            Canned::status("404 Not Found"),
            Canned::status("429 Too Many Requests"),
            Canned::status("500 Internal Server Error"),
        ]
    });
    let source = ManifestSource::new(format!("{base}/manifest.json"), test_client());

    let err = source.check_latest(Channel::Stable).expect_err("404");
    assert!(matches!(err, CheckError::NoReleases { .. }));
    let err = source.check_latest(Channel::Stable).expect_err("429");
    assert!(matches!(err, CheckError::RateLimited { .. }));
    let err = source.check_latest(Channel::Stable).expect_err("500");
    assert!(matches!(err, CheckError::HttpStatus { status: 500, .. }));
}

#[test]
fn github_source_reads_checksum_asset() {
    let digest = sha256_hex(b"payload");
    let base = serve(|base| {
        let release = format!(
            r#"{{"tag_name": "v2.0.0", "assets": [
                {{"name": "airdocs.tar.gz", "browser_download_url": "{base}/airdocs.tar.gz", "size": 7}},
                {{"name": "airdocs.tar.gz.sha256", "browser_download_url": "{base}/airdocs.tar.gz.sha256"}}
            ]}}"#
        );
        vec![
            Canned::ok(release),
            Canned::ok(format!("{digest}  airdocs.tar.gz\n")),
        ]
    });
    let source = GithubSource::new("airdocs/airdocs", Some(base), ".tar.gz", test_client());
    let release = source
        .check_latest(Channel::Stable)
        .expect("must fetch release");
    assert_eq!(release.version.to_string(), "2.0.0");
    assert_eq!(release.sha256.as_deref(), Some(digest.as_str()));
}

#[test]
fn download_reports_ordered_progress_and_renames_on_completion() {
    let payload = vec![7_u8; 200_000];
    let expected_digest = sha256_hex(&payload);
    let body = payload.clone();
    let base = serve(move |_| vec![Canned::ok(body)]);
    let dir = test_dir();
    let destination = dir.join("update_1.2.0.tar.gz");

    let transfer =
        download(&test_client(), &format!("{base}/pkg"), &destination).expect("must start");
    assert_eq!(transfer.bytes_total(), Some(200_000));

    let mut events = Vec::new();
    let finished = transfer
        .run(|event| events.push(event))
        .expect("must complete download");

    assert_eq!(finished, destination);
    assert_eq!(events.first().map(|event| event.bytes_done), Some(0));
    assert!(events
        .windows(2)
        .all(|pair| pair[0].bytes_done <= pair[1].bytes_done));
    assert_eq!(events.last().map(|event| event.bytes_done), Some(200_000));
    let written = fs::read(&destination).expect("must read download");
    assert_eq!(sha256_hex(&written), expected_digest);
    assert!(!part_path_for(&destination).exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn download_rejects_non_success_status() {
    let base = serve(|_| vec![Canned::status("503 Service Unavailable")]);
    let dir = test_dir();
    let destination = dir.join("update.tar.gz");

    let err = match download(&test_client(), &format!("{base}/pkg"), &destination) {
        Ok(_) => panic!("503 must fail"),
        Err(err) => err,
    };
    assert!(matches!(err, FetchError::HttpStatus { status: 503, .. }));
    assert!(!destination.exists());
    assert!(!part_path_for(&destination).exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn interrupted_download_leaves_no_file_at_destination() {
    let base = serve(|_| vec![Canned::truncated(1000, vec![1_u8; 10])]);
    let dir = test_dir();
    let destination = dir.join("update.tar.gz");

    let result = download(&test_client(), &format!("{base}/pkg"), &destination)
        .and_then(|transfer| transfer.run(|_| {}));

    assert!(result.is_err(), "killed transfer must not succeed");
    assert!(!destination.exists());
    assert!(!part_path_for(&destination).exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn dropping_download_midway_discards_partial_file() {
    let base = serve(|_| vec![Canned::ok(vec![3_u8; 4 * 1024 * 1024])]);
    let dir = test_dir();
    let destination = dir.join("update.tar.gz");

    let mut transfer =
        download(&test_client(), &format!("{base}/pkg"), &destination).expect("must start");
    let part = transfer.part_path().to_path_buf();
    transfer
        .next()
        .expect("announce event")
        .expect("announce ok");
    transfer
        .next()
        .expect("first chunk event")
        .expect("first chunk ok");
    assert!(part.exists());
    assert!(!transfer.is_complete());
    drop(transfer);

    assert!(!part.exists());
    assert!(!destination.exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn part_path_is_distinct_from_destination() {
    let destination = PathBuf::from("/tmp/updates/update_1.0.0.tar.gz");
    assert_eq!(
        part_path_for(&destination),
        PathBuf::from("/tmp/updates/update_1.0.0.tar.gz.part")
    );
}
