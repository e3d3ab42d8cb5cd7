//! In-memory index: unit rows plus the RBAC tables, optionally snapshotted to a JSON
//! file after every RBAC write and reloaded on startup.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::QueryIndex;
use crate::error::{StoreError, StoreResult};
use crate::identity::{OrgId, Principal};
use crate::rbac::{decide, Action, Permission, PermissionRule, RbacStore, Role, UserAssignment};
use crate::storage::{LockInfo, UnitMetadata};

#[derive(Debug, Clone)]
struct UnitRow {
    size: u64,
    updated: DateTime<Utc>,
    lock: Option<LockInfo>,
}

impl UnitRow {
    fn metadata(&self, id: &str) -> UnitMetadata {
        UnitMetadata { id: id.to_string(), size: self.size, updated: self.updated, locked: self.lock.is_some(), lock: self.lock.clone() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OrgTables {
    #[serde(default)]
    permissions: BTreeMap<String, Permission>,
    #[serde(default)]
    roles: BTreeMap<String, Role>,
    #[serde(default)]
    assignments: BTreeMap<String, UserAssignment>,
}

impl OrgTables {
    /// `None` when RBAC is off for the org (every read allowed), otherwise the rules
    /// reachable from the subject's roles.
    fn read_rules(&self, subject: &str) -> Option<Vec<PermissionRule>> {
        if self.permissions.is_empty() {
            return None;
        }
        let mut rules = Vec::new();
        if let Some(assignment) = self.assignments.get(subject) {
            for role in assignment.roles.iter().filter_map(|r| self.roles.get(r)) {
                for permission in role.permissions.iter().filter_map(|p| self.permissions.get(p)) {
                    rules.extend(permission.rules.iter().cloned());
                }
            }
        }
        Some(rules)
    }
}

type RbacTables = BTreeMap<OrgId, OrgTables>;

#[derive(Default)]
pub struct MemoryIndex {
    units: RwLock<BTreeMap<String, UnitRow>>,
    rbac: RwLock<RbacTables>,
    snapshot: Option<PathBuf>,
    /// Snapshot writes run one at a time; each captures the tables as of its turn.
    persist_lock: tokio::sync::Mutex<()>,
}

impl MemoryIndex {
    pub fn new() -> Self { Self::default() }

    /// Index whose RBAC tables persist to `path`. An existing snapshot is loaded.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let tables: RbacTables = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RbacTables::new(),
            Err(e) => return Err(e.into()),
        };
        info!(target: "statesman::index", path = %path.display(), orgs = tables.len(), "rbac snapshot loaded");
        Ok(Self { rbac: RwLock::new(tables), snapshot: Some(path), ..Self::default() })
    }

    async fn persist(&self) -> StoreResult<()> {
        let Some(path) = &self.snapshot else { return Ok(()) };
        let _turn = self.persist_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(&*self.rbac.read())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(target: "statesman::index", path = %path.display(), "rbac snapshot written");
        Ok(())
    }

    fn read_org<T>(&self, org: &OrgId, f: impl FnOnce(&OrgTables) -> T) -> T {
        let tables = self.rbac.read();
        match tables.get(org) {
            Some(t) => f(t),
            None => f(&OrgTables::default()),
        }
    }

    fn prefixed(&self, prefix: &str) -> Vec<UnitMetadata> {
        let prefix = prefix.trim_start_matches('/');
        self.units.read().iter().filter(|(id, _)| id.starts_with(prefix)).map(|(id, row)| row.metadata(id)).collect()
    }
}

#[async_trait]
impl QueryIndex for MemoryIndex {
    async fn ensure_unit(&self, unit_id: &str) -> StoreResult<()> {
        self.units.write().entry(unit_id.to_string()).or_insert_with(|| UnitRow { size: 0, updated: Utc::now(), lock: None });
        Ok(())
    }

    async fn sync_metadata(&self, unit_id: &str, size: u64, updated: DateTime<Utc>) -> StoreResult<()> {
        let mut units = self.units.write();
        let row = units.entry(unit_id.to_string()).or_insert_with(|| UnitRow { size, updated, lock: None });
        row.size = size;
        row.updated = updated;
        Ok(())
    }

    async fn sync_lock(&self, unit_id: &str, lock: &LockInfo) -> StoreResult<()> {
        let mut units = self.units.write();
        let row = units.entry(unit_id.to_string()).or_insert_with(|| UnitRow { size: 0, updated: Utc::now(), lock: None });
        row.lock = Some(lock.clone());
        Ok(())
    }

    async fn sync_unlock(&self, unit_id: &str) -> StoreResult<()> {
        if let Some(row) = self.units.write().get_mut(unit_id) {
            row.lock = None;
        }
        Ok(())
    }

    async fn delete_unit(&self, unit_id: &str) -> StoreResult<()> {
        self.units.write().remove(unit_id);
        Ok(())
    }

    async fn list_units(&self, prefix: &str) -> StoreResult<Vec<UnitMetadata>> { Ok(self.prefixed(prefix)) }

    async fn list_units_for_principal(&self, org: &OrgId, principal: &Principal, prefix: &str) -> StoreResult<Vec<UnitMetadata>> {
        let rules = self.read_org(org, |t| t.read_rules(&principal.subject));
        let units = self.prefixed(prefix);
        Ok(match rules {
            None => units,
            Some(rules) => units.into_iter().filter(|u| decide(&rules, Action::Read, &u.id)).collect(),
        })
    }

    async fn can_perform_action(&self, org: &OrgId, principal: &Principal, action: Action, resource: &str) -> StoreResult<bool> {
        let rules = self.read_org(org, |t| t.read_rules(&principal.subject));
        Ok(rules.map_or(true, |rules| decide(&rules, action, resource)))
    }
}

#[async_trait]
impl RbacStore for MemoryIndex {
    async fn has_permissions(&self, org: &OrgId) -> StoreResult<bool> {
        Ok(self.read_org(org, |t| !t.permissions.is_empty()))
    }

    async fn list_permissions(&self, org: &OrgId) -> StoreResult<Vec<Permission>> {
        Ok(self.read_org(org, |t| t.permissions.values().cloned().collect()))
    }

    async fn get_permission(&self, org: &OrgId, id: &str) -> StoreResult<Option<Permission>> {
        Ok(self.read_org(org, |t| t.permissions.get(id).cloned()))
    }

    async fn create_permission(&self, org: &OrgId, permission: &Permission) -> StoreResult<()> {
        {
            let mut tables = self.rbac.write();
            let org_tables = tables.entry(org.clone()).or_default();
            if org_tables.permissions.contains_key(&permission.id) {
                return Err(StoreError::AlreadyExists(format!("permission {}", permission.id)));
            }
            org_tables.permissions.insert(permission.id.clone(), permission.clone());
        }
        self.persist().await
    }

    async fn delete_permission(&self, org: &OrgId, id: &str) -> StoreResult<()> {
        {
            let mut tables = self.rbac.write();
            let removed = tables.get_mut(org).and_then(|t| t.permissions.remove(id));
            if removed.is_none() {
                return Err(StoreError::NotFound(format!("permission {id}")));
            }
        }
        self.persist().await
    }

    async fn list_roles(&self, org: &OrgId) -> StoreResult<Vec<Role>> {
        Ok(self.read_org(org, |t| t.roles.values().cloned().collect()))
    }

    async fn get_role(&self, org: &OrgId, id: &str) -> StoreResult<Option<Role>> {
        Ok(self.read_org(org, |t| t.roles.get(id).cloned()))
    }

    async fn save_role(&self, org: &OrgId, role: &Role, expected_version: u64) -> StoreResult<Role> {
        let saved = {
            let mut tables = self.rbac.write();
            let org_tables = tables.entry(org.clone()).or_default();
            let stored_version = org_tables.roles.get(&role.id).map(|r| r.version).unwrap_or(0);
            if stored_version != expected_version {
                return Err(StoreError::VersionConflict(format!("role {} is at version {stored_version}", role.id)));
            }
            let mut saved = role.clone();
            saved.version = expected_version + 1;
            org_tables.roles.insert(saved.id.clone(), saved.clone());
            saved
        };
        self.persist().await?;
        Ok(saved)
    }

    async fn delete_role(&self, org: &OrgId, id: &str) -> StoreResult<()> {
        {
            let mut tables = self.rbac.write();
            let removed = tables.get_mut(org).and_then(|t| t.roles.remove(id));
            if removed.is_none() {
                return Err(StoreError::NotFound(format!("role {id}")));
            }
        }
        self.persist().await
    }

    async fn list_assignments(&self, org: &OrgId) -> StoreResult<Vec<UserAssignment>> {
        Ok(self.read_org(org, |t| t.assignments.values().cloned().collect()))
    }

    async fn get_assignment(&self, org: &OrgId, subject: &str) -> StoreResult<Option<UserAssignment>> {
        Ok(self.read_org(org, |t| t.assignments.get(subject).cloned()))
    }

    async fn find_assignment_by_email(&self, org: &OrgId, email: &str) -> StoreResult<Option<UserAssignment>> {
        Ok(self.read_org(org, |t| t.assignments.values().find(|a| !email.is_empty() && a.email.eq_ignore_ascii_case(email)).cloned()))
    }

    async fn save_assignment(&self, org: &OrgId, assignment: &UserAssignment, expected_version: u64) -> StoreResult<UserAssignment> {
        let saved = {
            let mut tables = self.rbac.write();
            let org_tables = tables.entry(org.clone()).or_default();
            let stored_version = org_tables.assignments.get(&assignment.subject).map(|a| a.version).unwrap_or(0);
            if stored_version != expected_version {
                return Err(StoreError::VersionConflict(format!("assignment {} is at version {stored_version}", assignment.subject)));
            }
            let mut saved = assignment.clone();
            saved.version = expected_version + 1;
            org_tables.assignments.insert(saved.subject.clone(), saved.clone());
            saved
        };
        self.persist().await?;
        Ok(saved)
    }
}
