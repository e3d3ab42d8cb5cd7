//! Query index contract. The index is the fast metadata view behind listings and RBAC
//! lookups; the blob store stays the source of truth for content.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::identity::{OrgId, Principal};
use crate::rbac::Action;
use crate::storage::{LockInfo, UnitMetadata};

mod memory;

pub use memory::MemoryIndex;

#[async_trait]
pub trait QueryIndex: Send + Sync {
    async fn ensure_unit(&self, unit_id: &str) -> StoreResult<()>;
    async fn sync_metadata(&self, unit_id: &str, size: u64, updated: DateTime<Utc>) -> StoreResult<()>;
    async fn sync_lock(&self, unit_id: &str, lock: &LockInfo) -> StoreResult<()>;
    async fn sync_unlock(&self, unit_id: &str) -> StoreResult<()>;
    async fn delete_unit(&self, unit_id: &str) -> StoreResult<()>;
    async fn list_units(&self, prefix: &str) -> StoreResult<Vec<UnitMetadata>>;
    /// Listing with the read check pushed down into the index.
    async fn list_units_for_principal(&self, org: &OrgId, principal: &Principal, prefix: &str) -> StoreResult<Vec<UnitMetadata>>;
    async fn can_perform_action(&self, org: &OrgId, principal: &Principal, action: Action, resource: &str) -> StoreResult<bool>;
}

#[cfg(test)]
mod memory_tests;
