//!
//! statesman storage module
//! ------------------------
//! Every layer that handles units implements the same `UnitStore` contract:
//!
//! - blob backends (`MemStore`, `ObjectStore`) own content, locks and version snapshots;
//! - `OrchestratingStore` fans mutations out to the blob store and the query index;
//! - `AuthorizingStore` gates each call on RBAC before delegating.
//!
//! Layers hold an `Arc<dyn UnitStore>` for the next one down, so the stack is composed
//! explicitly at startup (see `server::build_state`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::identity::RequestContext;

mod unit_id;
mod types;
mod versions;
mod memory;
mod object_client;
mod object;
mod retry;
mod tasks;
mod orchestrator;
mod authorizer;

pub use unit_id::{decode_unit_id, encode_unit_id, normalize_unit_id};
pub use types::{LockInfo, UnitMetadata, VersionInfo};
pub use versions::{content_hash, initial_state_payload};
pub use memory::MemStore;
pub use object_client::{FsObjectClient, MemoryObjectClient, ObjectClient, ObjectMeta, ObjectTags};
pub use object::ObjectStore;
pub use retry::{retry_best_effort, retry_sync, RetryPolicy};
pub use tasks::TaskQueue;
pub use orchestrator::OrchestratingStore;
pub use authorizer::AuthorizingStore;

pub const DEFAULT_MAX_VERSIONS: usize = 10;

/// Construction-time settings shared by both blob backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Number of version snapshots retained per unit.
    pub max_versions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self { Self { max_versions: DEFAULT_MAX_VERSIONS } }
}

impl StoreConfig {
    pub fn with_max_versions(max_versions: usize) -> Self {
        Self { max_versions: if max_versions == 0 { DEFAULT_MAX_VERSIONS } else { max_versions } }
    }
}

#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn create(&self, ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata>;
    async fn get(&self, ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata>;
    /// Units whose id starts with `prefix`; an empty prefix lists everything.
    async fn list(&self, ctx: &RequestContext, prefix: &str) -> StoreResult<Vec<UnitMetadata>>;
    async fn delete(&self, ctx: &RequestContext, id: &str) -> StoreResult<()>;
    async fn download(&self, ctx: &RequestContext, id: &str) -> StoreResult<Vec<u8>>;
    async fn upload(&self, ctx: &RequestContext, id: &str, data: &[u8], lock_id: &str) -> StoreResult<()>;
    async fn lock(&self, ctx: &RequestContext, id: &str, info: &LockInfo) -> StoreResult<()>;
    async fn unlock(&self, ctx: &RequestContext, id: &str, lock_id: &str) -> StoreResult<()>;
    async fn get_lock(&self, ctx: &RequestContext, id: &str) -> StoreResult<Option<LockInfo>>;
    /// Snapshots newest-first.
    async fn list_versions(&self, ctx: &RequestContext, id: &str) -> StoreResult<Vec<VersionInfo>>;
    async fn restore_version(&self, ctx: &RequestContext, id: &str, timestamp: DateTime<Utc>, lock_id: &str) -> StoreResult<()>;
}

pub type SharedUnitStore = Arc<dyn UnitStore>;

/// Write gate shared by the backends: a held lock admits only its own token.
pub(crate) fn check_write_lock(held: Option<&LockInfo>, lock_id: &str) -> StoreResult<()> {
    match held {
        Some(lock) if lock_id.is_empty() || lock.id != lock_id => Err(StoreError::LockConflict),
        _ => Ok(()),
    }
}

/// List prefixes are matched verbatim apart from a leading slash.
pub(crate) fn list_prefix(prefix: &str) -> &str { prefix.trim_start_matches('/') }

#[cfg(test)]
mod retry_tests;
#[cfg(test)]
mod tasks_tests;
