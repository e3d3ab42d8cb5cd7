//! Version snapshot naming, hashing and retention.

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use sha2::{Digest, Sha256};

use super::types::VersionInfo;

const KEY_TS_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const KEY_PREFIX: &str = "v-";
const KEY_SUFFIX: &str = ".tfstate";

/// `hex(sha256(data)[..4])`
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(&digest[..4])
}

pub(crate) fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let micros = ts.nanosecond() / 1_000;
    ts.with_nanosecond(micros * 1_000).unwrap_or(ts)
}

/// Timestamp for a new snapshot: now at microsecond precision, nudged forward so it
/// sorts strictly after `newest`.
pub(crate) fn next_version_timestamp(now: DateTime<Utc>, newest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = truncate_micros(now);
    match newest {
        Some(newest) if now <= newest => newest + Duration::microseconds(1),
        _ => now,
    }
}

pub(crate) fn version_key_name(timestamp: DateTime<Utc>, hash: &str) -> String {
    format!("{KEY_PREFIX}{}-{hash}{KEY_SUFFIX}", timestamp.format(KEY_TS_FORMAT))
}

/// Inverse of `version_key_name`; returns `None` for foreign objects.
pub(crate) fn parse_version_key_name(name: &str) -> Option<(DateTime<Utc>, String)> {
    let body = name.strip_prefix(KEY_PREFIX)?.strip_suffix(KEY_SUFFIX)?;
    let (ts, hash) = body.rsplit_once('-')?;
    if hash.len() != 8 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(ts, KEY_TS_FORMAT).ok()?;
    Some((naive.and_utc(), hash.to_string()))
}

/// Sorts newest-first and splits off everything past `max_versions`.
pub(crate) fn split_retained(mut versions: Vec<VersionInfo>, max_versions: usize) -> (Vec<VersionInfo>, Vec<VersionInfo>) {
    versions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let expired = if versions.len() > max_versions { versions.split_off(max_versions) } else { Vec::new() };
    (versions, expired)
}

/// Seed content written by Create: an empty Terraform state with a fresh lineage.
pub fn initial_state_payload() -> Vec<u8> {
    format!(
        "{{\n  \"version\": 4,\n  \"terraform_version\": \"1.0.0\",\n  \"serial\": 0,\n  \"lineage\": \"{}\",\n  \"outputs\": {{}},\n  \"resources\": []\n}}\n",
        uuid::Uuid::new_v4()
    )
    .into_bytes()
}
