//! RBAC gate in front of the orchestrating layer. Every call needs a principal; denied
//! calls fail before the next layer is touched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, warn};

use super::types::{LockInfo, UnitMetadata, VersionInfo};
use super::unit_id::normalize_unit_id;
use super::{SharedUnitStore, UnitStore};
use crate::error::{StoreError, StoreResult};
use crate::identity::RequestContext;
use crate::index::QueryIndex;
use crate::rbac::{Action, RbacManager};

pub struct AuthorizingStore {
    inner: SharedUnitStore,
    rbac: Arc<RbacManager>,
    index: Arc<dyn QueryIndex>,
}

impl AuthorizingStore {
    pub fn new(inner: SharedUnitStore, rbac: Arc<RbacManager>, index: Arc<dyn QueryIndex>) -> Self {
        Self { inner, rbac, index }
    }

    /// Returns the normalized id once `action` is allowed on it.
    async fn authorize(&self, ctx: &RequestContext, action: Action, id: &str) -> StoreResult<String> {
        let principal = ctx.require_principal()?;
        let id = normalize_unit_id(id)?;
        if !self.rbac.can(&ctx.org, principal, action, &id).await? {
            warn!(target: "statesman::authz", org = %ctx.org, subject = %principal.subject, action = action.as_str(), unit_id = %id, "denied");
            return Err(StoreError::Forbidden);
        }
        Ok(id)
    }
}

#[async_trait]
impl UnitStore for AuthorizingStore {
    async fn create(&self, ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata> {
        let id = self.authorize(ctx, Action::Write, id).await?;
        self.inner.create(ctx, &id).await
    }

    async fn get(&self, ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata> {
        let id = self.authorize(ctx, Action::Read, id).await?;
        self.inner.get(ctx, &id).await
    }

    async fn list(&self, ctx: &RequestContext, prefix: &str) -> StoreResult<Vec<UnitMetadata>> {
        let principal = ctx.require_principal()?;
        if self.rbac.is_system(principal) {
            return self.inner.list(ctx, prefix).await;
        }
        self.index.list_units_for_principal(&ctx.org, principal, prefix).await
    }

    async fn delete(&self, ctx: &RequestContext, id: &str) -> StoreResult<()> {
        let id = self.authorize(ctx, Action::Delete, id).await?;
        self.inner.delete(ctx, &id).await
    }

    async fn download(&self, ctx: &RequestContext, id: &str) -> StoreResult<Vec<u8>> {
        let id = self.authorize(ctx, Action::Read, id).await?;
        self.inner.download(ctx, &id).await
    }

    async fn upload(&self, ctx: &RequestContext, id: &str, data: &[u8], lock_id: &str) -> StoreResult<()> {
        let id = self.authorize(ctx, Action::Write, id).await?;
        self.inner.upload(ctx, &id, data, lock_id).await
    }

    async fn lock(&self, ctx: &RequestContext, id: &str, info: &LockInfo) -> StoreResult<()> {
        let id = self.authorize(ctx, Action::Lock, id).await?;
        self.inner.lock(ctx, &id, info).await?;
        if let Err(e) = self.index.sync_lock(&id, info).await {
            error!(target: "statesman::authz", unit_id = %id, critical = true, error = %e, "lock state not pushed to index");
        }
        Ok(())
    }

    async fn unlock(&self, ctx: &RequestContext, id: &str, lock_id: &str) -> StoreResult<()> {
        let id = self.authorize(ctx, Action::Lock, id).await?;
        self.inner.unlock(ctx, &id, lock_id).await?;
        if let Err(e) = self.index.sync_unlock(&id).await {
            error!(target: "statesman::authz", unit_id = %id, critical = true, error = %e, "unlock state not pushed to index");
        }
        Ok(())
    }

    async fn get_lock(&self, ctx: &RequestContext, id: &str) -> StoreResult<Option<LockInfo>> {
        let id = self.authorize(ctx, Action::Read, id).await?;
        self.inner.get_lock(ctx, &id).await
    }

    async fn list_versions(&self, ctx: &RequestContext, id: &str) -> StoreResult<Vec<VersionInfo>> {
        let id = self.authorize(ctx, Action::Read, id).await?;
        self.inner.list_versions(ctx, &id).await
    }

    async fn restore_version(&self, ctx: &RequestContext, id: &str, timestamp: DateTime<Utc>, lock_id: &str) -> StoreResult<()> {
        let id = self.authorize(ctx, Action::Write, id).await?;
        self.inner.restore_version(ctx, &id, timestamp, lock_id).await
    }
}
