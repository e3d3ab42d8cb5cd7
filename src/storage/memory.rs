//! In-memory unit store for tests and embedded mode.
//! One reader/writer lock guards every unit; archive and prune run inside the same
//! critical section as the content swap.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::types::{LockInfo, UnitMetadata, VersionInfo};
use super::unit_id::normalize_unit_id;
use super::versions::{content_hash, initial_state_payload, next_version_timestamp, split_retained, truncate_micros, version_key_name};
use super::{check_write_lock, list_prefix, StoreConfig, UnitStore};
use crate::error::{StoreError, StoreResult};
use crate::identity::RequestContext;

#[derive(Clone)]
struct Snapshot {
    info: VersionInfo,
    data: Vec<u8>,
}

struct UnitRecord {
    data: Vec<u8>,
    /// Content is still the payload written by Create; never archived.
    seed: bool,
    updated: DateTime<Utc>,
    lock: Option<LockInfo>,
    /// Oldest first.
    versions: Vec<Snapshot>,
}

impl UnitRecord {
    fn metadata(&self, id: &str) -> UnitMetadata {
        UnitMetadata {
            id: id.to_string(),
            size: self.data.len() as u64,
            updated: self.updated,
            locked: self.lock.is_some(),
            lock: self.lock.clone(),
        }
    }

    fn archive_current(&mut self, max_versions: usize) {
        if self.data.is_empty() || self.seed {
            return;
        }
        let newest = self.versions.last().map(|s| s.info.timestamp);
        let timestamp = next_version_timestamp(Utc::now(), newest);
        let hash = content_hash(&self.data);
        let key = version_key_name(timestamp, &hash);
        self.versions.push(Snapshot {
            info: VersionInfo { timestamp, hash, size: self.data.len() as u64, key },
            data: self.data.clone(),
        });
        if self.versions.len() > max_versions {
            let excess = self.versions.len() - max_versions;
            self.versions.drain(..excess);
        }
    }

    fn replace_content(&mut self, data: Vec<u8>) {
        self.data = data;
        self.seed = false;
        self.updated = Utc::now();
    }
}

pub struct MemStore {
    units: RwLock<HashMap<String, UnitRecord>>,
    config: StoreConfig,
}

impl MemStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { units: RwLock::new(HashMap::new()), config }
    }
}

impl Default for MemStore {
    fn default() -> Self { Self::new(StoreConfig::default()) }
}

fn not_found(id: &str) -> StoreError { StoreError::NotFound(format!("unit {id}")) }

#[async_trait]
impl UnitStore for MemStore {
    async fn create(&self, _ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata> {
        let id = normalize_unit_id(id)?;
        let mut units = self.units.write();
        if units.contains_key(&id) {
            return Err(StoreError::AlreadyExists(format!("unit {id}")));
        }
        let record = UnitRecord { data: initial_state_payload(), seed: true, updated: Utc::now(), lock: None, versions: Vec::new() };
        let meta = record.metadata(&id);
        units.insert(id.clone(), record);
        debug!(unit_id = %id, "memstore.create");
        Ok(meta)
    }

    async fn get(&self, _ctx: &RequestContext, id: &str) -> StoreResult<UnitMetadata> {
        let id = normalize_unit_id(id)?;
        let units = self.units.read();
        units.get(&id).map(|r| r.metadata(&id)).ok_or_else(|| not_found(&id))
    }

    async fn list(&self, _ctx: &RequestContext, prefix: &str) -> StoreResult<Vec<UnitMetadata>> {
        let prefix = list_prefix(prefix);
        let units = self.units.read();
        let mut out: Vec<UnitMetadata> = units
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, r)| r.metadata(id))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn delete(&self, _ctx: &RequestContext, id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        let mut units = self.units.write();
        units.remove(&id).map(|_| ()).ok_or_else(|| not_found(&id))
    }

    async fn download(&self, _ctx: &RequestContext, id: &str) -> StoreResult<Vec<u8>> {
        let id = normalize_unit_id(id)?;
        let units = self.units.read();
        units.get(&id).map(|r| r.data.clone()).ok_or_else(|| not_found(&id))
    }

    async fn upload(&self, _ctx: &RequestContext, id: &str, data: &[u8], lock_id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        let mut units = self.units.write();
        let record = units.get_mut(&id).ok_or_else(|| not_found(&id))?;
        check_write_lock(record.lock.as_ref(), lock_id)?;
        record.archive_current(self.config.max_versions);
        record.replace_content(data.to_vec());
        debug!(unit_id = %id, size = data.len(), versions = record.versions.len(), "memstore.upload");
        Ok(())
    }

    async fn lock(&self, _ctx: &RequestContext, id: &str, info: &LockInfo) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        let mut units = self.units.write();
        let record = units.get_mut(&id).ok_or_else(|| not_found(&id))?;
        if record.lock.is_some() {
            return Err(StoreError::LockConflict);
        }
        record.lock = Some(info.clone());
        Ok(())
    }

    async fn unlock(&self, _ctx: &RequestContext, id: &str, lock_id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        let mut units = self.units.write();
        let record = units.get_mut(&id).ok_or_else(|| not_found(&id))?;
        match &record.lock {
            None => Err(StoreError::NotLocked),
            Some(held) if held.id != lock_id => Err(StoreError::LockConflict),
            Some(_) => {
                record.lock = None;
                Ok(())
            }
        }
    }

    async fn get_lock(&self, _ctx: &RequestContext, id: &str) -> StoreResult<Option<LockInfo>> {
        let id = normalize_unit_id(id)?;
        let units = self.units.read();
        units.get(&id).map(|r| r.lock.clone()).ok_or_else(|| not_found(&id))
    }

    async fn list_versions(&self, _ctx: &RequestContext, id: &str) -> StoreResult<Vec<VersionInfo>> {
        let id = normalize_unit_id(id)?;
        let units = self.units.read();
        let record = units.get(&id).ok_or_else(|| not_found(&id))?;
        let infos = record.versions.iter().map(|s| s.info.clone()).collect();
        let (kept, _) = split_retained(infos, usize::MAX);
        Ok(kept)
    }

    async fn restore_version(&self, _ctx: &RequestContext, id: &str, timestamp: DateTime<Utc>, lock_id: &str) -> StoreResult<()> {
        let id = normalize_unit_id(id)?;
        let wanted = truncate_micros(timestamp);
        let mut units = self.units.write();
        let record = units.get_mut(&id).ok_or_else(|| not_found(&id))?;
        check_write_lock(record.lock.as_ref(), lock_id)?;
        let data = record
            .versions
            .iter()
            .find(|s| s.info.timestamp == wanted)
            .map(|s| s.data.clone())
            .ok_or(StoreError::VersionNotFound)?;
        record.archive_current(self.config.max_versions);
        record.replace_content(data);
        debug!(unit_id = %id, timestamp = %wanted, "memstore.restore_version");
        Ok(())
    }
}
