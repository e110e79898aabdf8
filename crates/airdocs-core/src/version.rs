use std::cmp::Ordering;

use anyhow::{Context, Result};
use semver::Version;

/// Parses `MAJOR.MINOR.PATCH[-pre][+build]`, tolerating surrounding
/// whitespace and a leading `v` as used by release tags.
pub fn parse_version(input: &str) -> Result<Version> {
    let trimmed = input.trim();
    let clean = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(clean).with_context(|| format!("invalid version: {input}"))
}

/// Precedence ordering; build metadata does not participate.
pub fn compare_versions(left: &Version, right: &Version) -> Ordering {
    (left.major, left.minor, left.patch)
        .cmp(&(right.major, right.minor, right.patch))
        .then_with(|| left.pre.cmp(&right.pre))
}

pub fn is_newer_version(current: &Version, available: &Version) -> bool {
    compare_versions(current, available) == Ordering::Less
}
