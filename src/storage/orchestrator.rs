//! Keeps the query index in step with the blob store.
//!
//! Mutations hit the blob store first; once that succeeds the matching index update is
//! queued on the background pool and retried with backoff. An index failure is logged
//! as critical and never reaches the caller. Listings come from the index only, while
//! single-unit reads and content always come from the blob store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::retry::{retry_best_effort, retry_sync, RetryPolicy};
use super::tasks::TaskQueue;
use super::types::{LockInfo, UnitMetadata, VersionInfo};
use super::unit_id::normalize_unit_id;
use super::{SharedUnitStore, UnitStore};
use crate::error::StoreResult;
use crate::identity::RequestContext;
use crate::index::QueryIndex;

#[derive(Debug, Clone)]
enum IndexSync {
    Created { size: u64, updated: DateTime<Utc> },
    Metadata { size: u64, updated: DateTime<Utc> },
    Locked(LockInfo),
    Unlocked,
    Deleted,
}

impl IndexSync {
    fn operation(&self) -> &'static str {
        match self {
            IndexSync::Created { .. } => "index.ensure_unit",
            IndexSync::Metadata { .. } => "index.sync_metadata",
            IndexSync::Locked(_) => "index.sync_lock",
            IndexSync::Unlocked => "index.sync_unlock",
            IndexSync::Deleted => "index.delete_unit",
        }
    }
}

async fn apply(index: &dyn QueryIndex, unit_id: &str, sync: &IndexSync) -> StoreResult<()> {
    match sync {
        IndexSync::Created { size, updated } => {
            index.ensure_unit(unit_id).await?;
            index.sync_metadata(unit_id, *size, *updated).await
        }
        IndexSync::Metadata { size, updated } => index.sync_metadata(unit_id, *size, *updated).await,
        IndexSync::Locked(lock) => index.sync_lock(unit_id, lock).await,
        IndexSync::Unlocked => index.sync_unlock(unit_id).await,
        IndexSync::Deleted => index.delete_unit(unit_id).await,
    }
}

pub struct OrchestratingStore {
    blob: SharedUnitStore,
    index: Arc<dyn QueryIndex>,
    tasks: Arc<TaskQueue>,
    retry: RetryPolicy,
}

impl OrchestratingStore {
    pub fn new(blob: SharedUnitStore, index: Arc<dyn QueryIndex>, tasks: Arc<TaskQueue>) -> Self {
        Self { blob, index, tasks, retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn schedule(&self, unit_id: &str, sync: IndexSync) {
        let index = self.index.clone();
        let policy = self.retry;
        let cancel = self.tasks.cancellation_token();
        let id = unit_id.to_string();
        self.tasks
            .submit(unit_id, async move {
                let operation = sync.operation();
                retry_best_effort(&policy, &cancel, operation, || apply(index.as_ref(), &id, &sync)).await;
            })
            .await;
    }

    /// Syncs the index row from the blob's own metadata so both report the same
    /// size and `updated`.
    async fn schedule_metadata(&self, ctx: &RequestContext, unit_id: &str, operation: &str) {
        match self.blob.get(ctx, unit_id).await {
            Ok(meta) => self.schedule(unit_id, IndexSync::Metadata { size: meta.size, updated: meta.updated }).await,
            Err(e) => {
                error!(target: "statesman::orchestrator", operation, unit_id, critical = true, error = %e, "index sync skipped: blob metadata unreadable")
            }
        }
    }

    /// Rebuilds index rows from the blob store; failures propagate. Returns how many
    /// units were synced.
    pub async fn reconcile_index(&self, ctx: &RequestContext) -> StoreResult<usize> {
        let cancel = self.tasks.cancellation_token();
        let units = self.blob.list(ctx, "").await?;
        for unit in &units {
            let created = IndexSync::Created { size: unit.size, updated: unit.updated };
            retry_sync(&self.retry, &cancel, "index.reconcile", || apply(self.index.as_ref(), &unit.id, &created)).await?;
            let lock_state = match &unit.lock {
                Some(lock) => IndexSync::Locked(lock.clone()),
                None => IndexSync::Unlocked,
            };
            retry_sync(&self.retry, &cancel, "index.reconcile", || apply(self.index.as_ref(), &unit.id, &lock_state)).await?;
        }
        info!(target: "statesman::orchestrator", units = units.len(), "index reconciled from blob store");
        Ok(units.len())
    }
}

#[async_trait]
impl UnitStore for OrchestratingStore {
    async fn create(&self, ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata> {
        let meta = self.blob.create(ctx, id).await?;
        self.schedule(&meta.id, IndexSync::Created { size: meta.size, updated: meta.updated }).await;
        Ok(meta)
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata> { self.blob.get(ctx, id).await }

    async fn list(&self, _ctx: &RequestContext, prefix: &str) -> StoreResult<Vec<UnitMetadata>> { self.index.list_units(prefix).await }

    async fn delete(&self, ctx: &RequestContext, id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        self.blob.delete(ctx, &id).await?;
        self.schedule(&id, IndexSync::Deleted).await;
        Ok(())
    }

    async fn download(&self, ctx: &RequestContext, id: &str) -> StoreResult<Vec<u8>> { self.blob.download(ctx, id).await }

    async fn upload(&self, ctx: &RequestContext, id: &str, data: &[u8], lock_id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        self.blob.upload(ctx, &id, data, lock_id).await?;
        self.schedule_metadata(ctx, &id, "upload").await;
        Ok(())
    }

    async fn lock(&self, ctx: &RequestContext, id: &str, info: &LockInfo) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        self.blob.lock(ctx, &id, info).await?;
        self.schedule(&id, IndexSync::Locked(info.clone())).await;
        Ok(())
    }

    async fn unlock(&self, ctx: &RequestContext, id: &str, lock_id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        self.blob.unlock(ctx, &id, lock_id).await?;
        self.schedule(&id, IndexSync::Unlocked).await;
        Ok(())
    }

    async fn get_lock(&self, ctx: &RequestContext, id: &str) -> StoreResult<Option<LockInfo>> { self.blob.get_lock(ctx, id).await }

    async fn list_versions(&self, ctx: &RequestContext, id: &str) -> StoreResult<Vec<VersionInfo>> {
        self.blob.list_versions(ctx, id).await
    }

    async fn restore_version(&self, ctx: &RequestContext, id: &str, timestamp: DateTime<Utc>, lock_id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        self.blob.restore_version(ctx, &id, timestamp, lock_id).await?;
        self.schedule_metadata(ctx, &id, "restore_version").await;
        Ok(())
    }
}
