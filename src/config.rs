//! Server configuration read from `STATESMAN_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use tracing::warn;

use crate::identity::{DEFAULT_ORG, SYSTEM_SUBJECT};
use crate::storage::{StoreConfig, DEFAULT_MAX_VERSIONS};

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    /// Object-storage layout over a local directory.
    Fs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub object_prefix: String,
    pub store: StoreConfig,
    pub system_subjects: Vec<String>,
    pub default_org: String,
    pub workers: usize,
    pub queue_capacity: usize,
    pub index_snapshot: Option<PathBuf>,
    pub max_body_bytes: usize,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> { Self::from_lookup(|key| std::env::var(key).ok()) }

    /// Builds the config from any key lookup; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let addr = get("STATESMAN_HTTP_ADDR").unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let http_addr = addr.parse::<SocketAddr>().with_context(|| format!("STATESMAN_HTTP_ADDR is not a socket address: {addr}"))?;

        let backend = match get("STATESMAN_BACKEND").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("memory") => Backend::Memory,
            Some("fs") => Backend::Fs,
            Some(other) => return Err(anyhow!("unknown STATESMAN_BACKEND '{other}' (expected memory or fs)")),
        };

        let max_versions = get("STATESMAN_MAX_VERSIONS")
            .or_else(|| get("OPENTACO_MAX_VERSIONS"))
            .map(|raw| positive_or_default("STATESMAN_MAX_VERSIONS", &raw, DEFAULT_MAX_VERSIONS))
            .unwrap_or(DEFAULT_MAX_VERSIONS);

        let mut system_subjects: Vec<String> = get("STATESMAN_SYSTEM_SUBJECTS")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        if system_subjects.is_empty() {
            system_subjects.push(SYSTEM_SUBJECT.to_string());
        }

        let number = |key: &str, default: usize| get(key).map(|raw| positive_or_default(key, &raw, default)).unwrap_or(default);

        Ok(Self {
            http_addr,
            backend,
            data_dir: get("STATESMAN_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            object_prefix: get("STATESMAN_OBJECT_PREFIX").unwrap_or_default(),
            store: StoreConfig::with_max_versions(max_versions),
            system_subjects,
            default_org: get("STATESMAN_DEFAULT_ORG").unwrap_or_else(|| DEFAULT_ORG.to_string()),
            workers: number("STATESMAN_WORKERS", DEFAULT_WORKERS),
            queue_capacity: number("STATESMAN_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            index_snapshot: get("STATESMAN_INDEX_SNAPSHOT").map(PathBuf::from),
            max_body_bytes: number("STATESMAN_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            backend: Backend::Memory,
            data_dir: PathBuf::from("data"),
            object_prefix: String::new(),
            store: StoreConfig::default(),
            system_subjects: vec![SYSTEM_SUBJECT.to_string()],
            default_org: DEFAULT_ORG.to_string(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            index_snapshot: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

fn positive_or_default(key: &str, raw: &str, default: usize) -> usize {
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => {
            warn!(target: "statesman::config", key, value = raw, default, "invalid value; using default");
            default
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
