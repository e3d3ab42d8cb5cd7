//! Durable unit store over an object-storage client.
//!
//! Key layout under the configured prefix:
//!
//! ```text
//! <prefix><unit>/terraform.tfstate
//! <prefix><unit>/terraform.tfstate.lock
//! <prefix><unit>/versions/v-<YYYYMMDDTHHMMSS.ffffff>Z-<hash8>.tfstate
//! ```
//!
//! Create and Lock are HEAD-then-PUT. The client offers no conditional put, so two
//! servers racing on the same unit can both succeed; last writer wins.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::object_client::{ObjectClient, ObjectMeta, ObjectTags};
use super::types::{LockInfo, UnitMetadata, VersionInfo};
use super::unit_id::normalize_unit_id;
use super::versions::{content_hash, initial_state_payload, next_version_timestamp, parse_version_key_name, split_retained, truncate_micros, version_key_name};
use super::{check_write_lock, list_prefix, StoreConfig, UnitStore};
use crate::error::{StoreError, StoreResult};
use crate::identity::RequestContext;

const STATE_FILE: &str = "terraform.tfstate";
const LOCK_FILE: &str = "terraform.tfstate.lock";
const VERSIONS_DIR: &str = "versions";
/// Marks state objects still holding the payload written by Create.
const SEED_TAG: &str = "statesman-seed";

pub struct ObjectStore {
    client: Arc<dyn ObjectClient>,
    prefix: String,
    config: StoreConfig,
}

fn not_found(id: &str) -> StoreError { StoreError::NotFound(format!("unit {id}")) }

impl ObjectStore {
    pub fn new(client: Arc<dyn ObjectClient>, prefix: &str, config: StoreConfig) -> Self {
        let trimmed = prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() { String::new() } else { format!("{trimmed}/") };
        Self { client, prefix, config }
    }

    fn state_key(&self, id: &str) -> String { format!("{}{id}/{STATE_FILE}", self.prefix) }
    fn lock_key(&self, id: &str) -> String { format!("{}{id}/{LOCK_FILE}", self.prefix) }
    fn versions_prefix(&self, id: &str) -> String { format!("{}{id}/{VERSIONS_DIR}/", self.prefix) }

    async fn head_state(&self, id: &str) -> StoreResult<ObjectMeta> {
        self.client.head_object(&self.state_key(id)).await?.ok_or_else(|| not_found(id))
    }

    async fn read_lock(&self, id: &str) -> StoreResult<Option<LockInfo>> {
        match self.client.get_object(&self.lock_key(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn versions(&self, id: &str) -> StoreResult<Vec<VersionInfo>> {
        let prefix = self.versions_prefix(id);
        let objects = self.client.list_objects(&prefix).await?;
        let infos = objects
            .into_iter()
            .filter_map(|obj| {
                let name = obj.key.strip_prefix(&prefix)?;
                let (timestamp, hash) = parse_version_key_name(name)?;
                Some(VersionInfo { timestamp, hash, size: obj.size, key: obj.key.clone() })
            })
            .collect();
        Ok(split_retained(infos, usize::MAX).0)
    }

    /// Copies the current state into the version history (unless it is empty or the
    /// Create seed), then prunes past the retention limit.
    async fn archive_current(&self, id: &str, current: &ObjectMeta) -> StoreResult<()> {
        if current.size == 0 || current.tags.get(SEED_TAG).map(String::as_str) == Some("true") {
            return Ok(());
        }
        let state_key = self.state_key(id);
        let Some(data) = self.client.get_object(&state_key).await? else {
            return Ok(());
        };
        let existing = self.versions(id).await?;
        let timestamp = next_version_timestamp(Utc::now(), existing.first().map(|v| v.timestamp));
        let key = format!("{}{}", self.versions_prefix(id), version_key_name(timestamp, &content_hash(&data)));
        self.client.copy_object(&state_key, &key).await?;
        debug!(unit_id = %id, version_key = %key, "objectstore.archive");

        let all = self.versions(id).await?;
        let (_, expired) = split_retained(all, self.config.max_versions);
        for version in expired {
            if let Err(e) = self.client.delete_object(&version.key).await {
                warn!(unit_id = %id, version_key = %version.key, error = %e, "objectstore.prune failed");
            }
        }
        Ok(())
    }

    async fn metadata(&self, id: &str, state: &ObjectMeta) -> StoreResult<UnitMetadata> {
        let lock = self.read_lock(id).await?;
        Ok(UnitMetadata { id: id.to_string(), size: state.size, updated: state.last_modified, locked: lock.is_some(), lock })
    }
}

#[async_trait]
impl UnitStore for ObjectStore {
    async fn create(&self, _ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata> {
        let id = normalize_unit_id(id)?;
        let key = self.state_key(&id);
        if self.client.head_object(&key).await?.is_some() {
            return Err(StoreError::AlreadyExists(format!("unit {id}")));
        }
        let mut tags = ObjectTags::new();
        tags.insert(SEED_TAG.to_string(), "true".to_string());
        self.client.put_object(&key, initial_state_payload(), tags).await?;
        let state = self.head_state(&id).await?;
        Ok(UnitMetadata { id, size: state.size, updated: state.last_modified, locked: false, lock: None })
    }

    async fn get(&self, _ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata> {
        let id = normalize_unit_id(id)?;
        let state = self.head_state(&id).await?;
        self.metadata(&id, &state).await
    }

    async fn list(&self, _ctx: &RequestContext, prefix: &str) -> StoreResult<Vec<UnitMetadata>> {
        let search = format!("{}{}", self.prefix, list_prefix(prefix));
        let objects = self.client.list_objects(&search).await?;
        let state_suffix = format!("/{STATE_FILE}");
        let lock_suffix = format!("/{LOCK_FILE}");
        let locked: HashSet<&str> = objects
            .iter()
            .filter_map(|o| o.key.strip_prefix(self.prefix.as_str())?.strip_suffix(lock_suffix.as_str()))
            .collect();
        let mut out = Vec::new();
        for obj in &objects {
            let Some(id) = obj.key.strip_prefix(self.prefix.as_str()).and_then(|k| k.strip_suffix(state_suffix.as_str())) else {
                continue;
            };
            let lock = if locked.contains(id) { self.read_lock(id).await? } else { None };
            out.push(UnitMetadata { id: id.to_string(), size: obj.size, updated: obj.last_modified, locked: lock.is_some(), lock });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn delete(&self, _ctx: &RequestContext, id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        self.head_state(&id).await?;
        self.client.delete_object(&self.state_key(&id)).await?;
        self.client.delete_object(&self.lock_key(&id)).await?;
        for version in self.versions(&id).await? {
            self.client.delete_object(&version.key).await?;
        }
        Ok(())
    }

    async fn download(&self, _ctx: &RequestContext, id: &str) -> StoreResult<Vec<u8>> {
        let id = normalize_unit_id(id)?;
        self.client.get_object(&self.state_key(&id)).await?.ok_or_else(|| not_found(&id))
    }

    async fn upload(&self, _ctx: &RequestContext, id: &str, data: &[u8], lock_id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        let state = self.head_state(&id).await?;
        check_write_lock(self.read_lock(&id).await?.as_ref(), lock_id)?;
        self.archive_current(&id, &state).await?;
        self.client.put_object(&self.state_key(&id), data.to_vec(), ObjectTags::new()).await
    }

    async fn lock(&self, _ctx: &RequestContext, id: &str, info: &LockInfo) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        self.head_state(&id).await?;
        let lock_key = self.lock_key(&id);
        if self.client.head_object(&lock_key).await?.is_some() {
            return Err(StoreError::LockConflict);
        }
        self.client.put_object(&lock_key, serde_json::to_vec(info)?, ObjectTags::new()).await
    }

    async fn unlock(&self, _ctx: &RequestContext, id: &str, lock_id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        self.head_state(&id).await?;
        match self.read_lock(&id).await? {
            None => Err(StoreError::NotLocked),
            Some(held) if held.id != lock_id => Err(StoreError::LockConflict),
            Some(_) => self.client.delete_object(&self.lock_key(&id)).await,
        }
    }

    async fn get_lock(&self, _ctx: &RequestContext, id: &str) -> StoreResult<Option<LockInfo>> {
        let id = normalize_unit_id(id)?;
        self.head_state(&id).await?;
        self.read_lock(&id).await
    }

    async fn list_versions(&self, _ctx: &RequestContext, id: &str) -> StoreResult<Vec<VersionInfo>> {
        let id = normalize_unit_id(id)?;
        self.head_state(&id).await?;
        self.versions(&id).await
    }

    async fn restore_version(&self, _ctx: &RequestContext, id: &str, timestamp: DateTime<Utc>, lock_id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        let state = self.head_state(&id).await?;
        check_write_lock(self.read_lock(&id).await?.as_ref(), lock_id)?;
        let wanted = truncate_micros(timestamp);
        let version = self.versions(&id).await?.into_iter().find(|v| v.timestamp == wanted).ok_or(StoreError::VersionNotFound)?;
        let data = self.client.get_object(&version.key).await?.ok_or(StoreError::VersionNotFound)?;
        self.archive_current(&id, &state).await?;
        self.client.put_object(&self.state_key(&id), data, ObjectTags::new()).await?;
        debug!(unit_id = %id, timestamp = %wanted, "objectstore.restore_version");
        Ok(())
    }
}
