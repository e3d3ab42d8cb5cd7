use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lock record held against a unit. Terraform's capitalized field names are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(alias = "Who", default)]
    pub who: String,
    #[serde(alias = "Version", default)]
    pub version: String,
    #[serde(alias = "Created")]
    pub created: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(id: impl Into<String>, who: impl Into<String>) -> Self {
        Self { id: id.into(), who: who.into(), version: String::new(), created: Utc::now() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub id: String,
    pub size: u64,
    pub updated: DateTime<Utc>,
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub timestamp: DateTime<Utc>,
    /// First four bytes of the SHA-256 of the archived content, hex encoded.
    pub hash: String,
    pub size: u64,
    pub key: String,
}
