use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::matcher::decide;
use super::model::{Action, Permission, PermissionRule, Role, UserAssignment};
use super::store::RbacStore;
use crate::error::{StoreError, StoreResult};
use crate::identity::{OrgId, Principal, SYSTEM_SUBJECT};

pub const DEFAULT_ROLE: &str = "default";
pub const ADMIN_ROLE: &str = "admin";
const DEFAULT_PERMISSION: &str = "default";
const ADMIN_PERMISSION: &str = "admin";
/// Resource name checked for RBAC administration.
pub const RBAC_RESOURCE: &str = "rbac";
const OCC_ATTEMPTS: usize = 3;

/// Optimistic write loop: re-run `attempt` (which re-reads) while the store reports a
/// version conflict, up to `OCC_ATTEMPTS` times.
async fn with_occ_retry<T, F, Fut>(what: &str, mut attempt: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    for n in 1..=OCC_ATTEMPTS {
        match attempt().await {
            Err(StoreError::VersionConflict(detail)) => {
                debug!(target: "statesman::rbac", what, attempt = n, %detail, "version conflict, retrying");
            }
            other => return other,
        }
    }
    Err(StoreError::VersionConflict(format!("{what}: gave up after {OCC_ATTEMPTS} attempts")))
}

pub struct RbacManager {
    store: Arc<dyn RbacStore>,
    system_subjects: HashSet<String>,
}

impl RbacManager {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store, system_subjects: HashSet::from([SYSTEM_SUBJECT.to_string()]) }
    }

    /// Extra subjects that bypass RBAC. The built-in system subject always does.
    pub fn with_system_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.system_subjects.extend(subjects.into_iter().map(Into::into).filter(|s: &String| !s.is_empty()));
        self
    }

    pub fn is_system(&self, principal: &Principal) -> bool { self.system_subjects.contains(&principal.subject) }

    /// Never cached; store errors propagate so callers fail closed.
    pub async fn is_enabled(&self, org: &OrgId) -> StoreResult<bool> { self.store.has_permissions(org).await }

    /// Rules reachable from the subject's roles, in role then permission order.
    /// `None` when the subject has no assignment.
    async fn rules_for(&self, org: &OrgId, subject: &str) -> StoreResult<Option<Vec<PermissionRule>>> {
        let Some(assignment) = self.store.get_assignment(org, subject).await? else {
            return Ok(None);
        };
        let mut rules = Vec::new();
        for role_id in &assignment.roles {
            let Some(role) = self.store.get_role(org, role_id).await? else { continue };
            for permission_id in &role.permissions {
                if let Some(permission) = self.store.get_permission(org, permission_id).await? {
                    rules.extend(permission.rules);
                }
            }
        }
        Ok(Some(rules))
    }

    pub async fn can(&self, org: &OrgId, principal: &Principal, action: Action, resource: &str) -> StoreResult<bool> {
        if self.is_system(principal) {
            return Ok(true);
        }
        if !self.is_enabled(org).await? {
            return Ok(true);
        }
        let allowed = match self.rules_for(org, &principal.subject).await? {
            Some(rules) => decide(&rules, action, resource),
            None => false,
        };
        debug!(target: "statesman::rbac", %org, subject = %principal.subject, action = action.as_str(), resource, allowed, "rbac.can");
        Ok(allowed)
    }

    pub async fn filter_units_by_read_access(&self, org: &OrgId, principal: &Principal, unit_ids: Vec<String>) -> StoreResult<Vec<String>> {
        if self.is_system(principal) || !self.is_enabled(org).await? {
            return Ok(unit_ids);
        }
        let Some(rules) = self.rules_for(org, &principal.subject).await? else {
            return Ok(Vec::new());
        };
        Ok(unit_ids.into_iter().filter(|id| decide(&rules, Action::Read, id)).collect())
    }

    async fn ensure_permission(&self, org: &OrgId, id: &str, description: &str, rules: Vec<PermissionRule>, created_by: &str) -> StoreResult<()> {
        if self.store.get_permission(org, id).await?.is_some() {
            return Ok(());
        }
        match self.create_permission(org, id, id, description, rules, created_by).await {
            Ok(_) | Err(StoreError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn ensure_role(&self, org: &OrgId, id: &str, description: &str, permission_id: &str, created_by: &str) -> StoreResult<()> {
        if self.store.get_role(org, id).await?.is_some() {
            return Ok(());
        }
        match self.create_role(org, id, id, description, vec![permission_id.to_string()], created_by).await {
            Ok(_) | Err(StoreError::VersionConflict(_)) | Err(StoreError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Idempotent bootstrap: seeds the default (read-only) and admin permission/role
    /// pairs when the org has no permissions, then makes `subject` an admin.
    pub async fn initialize_rbac(&self, org: &OrgId, subject: &str, email: &str) -> StoreResult<()> {
        if subject.is_empty() {
            return Err(StoreError::Unauthorized);
        }
        if !self.is_enabled(org).await? {
            self.ensure_permission(org, DEFAULT_PERMISSION, "Read access to every unit", vec![PermissionRule::allow(&[Action::Read], &["*"])], subject).await?;
            self.ensure_permission(org, ADMIN_PERMISSION, "Every action on every resource", vec![PermissionRule::allow(&[Action::All], &["*"])], subject).await?;
            self.ensure_role(org, DEFAULT_ROLE, "Read-only access", DEFAULT_PERMISSION, subject).await?;
            self.ensure_role(org, ADMIN_ROLE, "Full access", ADMIN_PERMISSION, subject).await?;
            info!(target: "statesman::rbac", %org, subject, "rbac initialized");
        }
        self.assign_role(org, subject, email, ADMIN_ROLE).await?;
        Ok(())
    }

    pub async fn list_permissions(&self, org: &OrgId) -> StoreResult<Vec<Permission>> { self.store.list_permissions(org).await }

    pub async fn create_permission(
        &self,
        org: &OrgId,
        id: &str,
        name: &str,
        description: &str,
        rules: Vec<PermissionRule>,
        created_by: &str,
    ) -> StoreResult<Permission> {
        if id.trim().is_empty() {
            return Err(StoreError::InvalidId("permission id is required".into()));
        }
        let permission = Permission {
            id: id.to_string(),
            org_id: org.clone(),
            name: if name.is_empty() { id.to_string() } else { name.to_string() },
            description: description.to_string(),
            rules,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        };
        self.store.create_permission(org, &permission).await?;
        info!(target: "statesman::rbac", %org, permission = id, "permission created");
        Ok(permission)
    }

    pub async fn delete_permission(&self, org: &OrgId, id: &str) -> StoreResult<()> { self.store.delete_permission(org, id).await }

    pub async fn list_roles(&self, org: &OrgId) -> StoreResult<Vec<Role>> { self.store.list_roles(org).await }

    pub async fn create_role(
        &self,
        org: &OrgId,
        id: &str,
        name: &str,
        description: &str,
        permissions: Vec<String>,
        created_by: &str,
    ) -> StoreResult<Role> {
        if id.trim().is_empty() {
            return Err(StoreError::InvalidId("role id is required".into()));
        }
        for permission_id in &permissions {
            if self.store.get_permission(org, permission_id).await?.is_none() {
                return Err(StoreError::NotFound(format!("permission {permission_id}")));
            }
        }
        let role = Role {
            id: id.to_string(),
            org_id: org.clone(),
            name: if name.is_empty() { id.to_string() } else { name.to_string() },
            description: description.to_string(),
            permissions,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
            version: 0,
        };
        let saved = self.store.save_role(org, &role, 0).await.map_err(|e| match e {
            StoreError::VersionConflict(_) => StoreError::AlreadyExists(format!("role {id}")),
            other => other,
        })?;
        info!(target: "statesman::rbac", %org, role = id, "role created");
        Ok(saved)
    }

    pub async fn add_permission_to_role(&self, org: &OrgId, role_id: &str, permission_id: &str) -> StoreResult<Role> {
        if self.store.get_permission(org, permission_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("permission {permission_id}")));
        }
        with_occ_retry("add permission to role", move || async move {
            let mut role = self.store.get_role(org, role_id).await?.ok_or_else(|| StoreError::NotFound(format!("role {role_id}")))?;
            if role.permissions.iter().any(|p| p == permission_id) {
                return Ok(role);
            }
            let expected = role.version;
            role.permissions.push(permission_id.to_string());
            self.store.save_role(org, &role, expected).await
        })
        .await
    }

    pub async fn delete_role(&self, org: &OrgId, id: &str) -> StoreResult<()> { self.store.delete_role(org, id).await }

    pub async fn list_assignments(&self, org: &OrgId) -> StoreResult<Vec<UserAssignment>> { self.store.list_assignments(org).await }

    pub async fn get_assignment(&self, org: &OrgId, subject: &str) -> StoreResult<Option<UserAssignment>> {
        self.store.get_assignment(org, subject).await
    }

    pub async fn assign_role(&self, org: &OrgId, subject: &str, email: &str, role_id: &str) -> StoreResult<UserAssignment> {
        if subject.trim().is_empty() {
            return Err(StoreError::InvalidId("subject is required".into()));
        }
        if self.store.get_role(org, role_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        let assignment = with_occ_retry("assign role", move || async move {
            let now = Utc::now();
            match self.store.get_assignment(org, subject).await? {
                None => {
                    let fresh = UserAssignment {
                        subject: subject.to_string(),
                        email: email.to_string(),
                        org_id: org.clone(),
                        roles: vec![role_id.to_string()],
                        created_at: now,
                        updated_at: now,
                        version: 0,
                    };
                    self.store.save_assignment(org, &fresh, 0).await
                }
                Some(mut existing) => {
                    let has_role = existing.roles.iter().any(|r| r == role_id);
                    if has_role && (email.is_empty() || existing.email == email) {
                        return Ok(existing);
                    }
                    let expected = existing.version;
                    if !has_role {
                        existing.roles.push(role_id.to_string());
                    }
                    if !email.is_empty() {
                        existing.email = email.to_string();
                    }
                    existing.updated_at = now;
                    self.store.save_assignment(org, &existing, expected).await
                }
            }
        })
        .await?;
        info!(target: "statesman::rbac", %org, subject, role = role_id, "role assigned");
        Ok(assignment)
    }

    pub async fn revoke_role(&self, org: &OrgId, subject: &str, role_id: &str) -> StoreResult<UserAssignment> {
        let assignment = with_occ_retry("revoke role", move || async move {
            let mut existing = self
                .store
                .get_assignment(org, subject)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("assignment for {subject}")))?;
            if !existing.roles.iter().any(|r| r == role_id) {
                return Ok(existing);
            }
            let expected = existing.version;
            existing.roles.retain(|r| r != role_id);
            existing.updated_at = Utc::now();
            self.store.save_assignment(org, &existing, expected).await
        })
        .await?;
        info!(target: "statesman::rbac", %org, subject, role = role_id, "role revoked");
        Ok(assignment)
    }

    async fn subject_for_email(&self, org: &OrgId, email: &str) -> StoreResult<String> {
        self.store
            .find_assignment_by_email(org, email)
            .await?
            .map(|a| a.subject)
            .ok_or_else(|| StoreError::NotFound(format!("user {email}")))
    }

    pub async fn assign_role_by_email(&self, org: &OrgId, email: &str, role_id: &str) -> StoreResult<UserAssignment> {
        let subject = self.subject_for_email(org, email).await?;
        self.assign_role(org, &subject, email, role_id).await
    }

    pub async fn revoke_role_by_email(&self, org: &OrgId, email: &str, role_id: &str) -> StoreResult<UserAssignment> {
        let subject = self.subject_for_email(org, email).await?;
        self.revoke_role(org, &subject, role_id).await
    }
}
