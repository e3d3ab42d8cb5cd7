use async_trait::async_trait;

use super::model::{Permission, Role, UserAssignment};
use crate::error::StoreResult;
use crate::identity::OrgId;

/// Persistence for RBAC entities. Role and assignment saves are optimistic: the caller
/// passes the version it read (`0` for a row it expects to be new) and gets
/// `VersionConflict` when the stored row moved on. A successful save returns the row
/// with its version bumped.
#[async_trait]
pub trait RbacStore: Send + Sync {
    /// Whether the org has at least one permission. Must error, not return `false`,
    /// when the backing store cannot answer.
    async fn has_permissions(&self, org: &OrgId) -> StoreResult<bool>;

    async fn list_permissions(&self, org: &OrgId) -> StoreResult<Vec<Permission>>;
    async fn get_permission(&self, org: &OrgId, id: &str) -> StoreResult<Option<Permission>>;
    /// `AlreadyExists` if the id is taken.
    async fn create_permission(&self, org: &OrgId, permission: &Permission) -> StoreResult<()>;
    async fn delete_permission(&self, org: &OrgId, id: &str) -> StoreResult<()>;

    async fn list_roles(&self, org: &OrgId) -> StoreResult<Vec<Role>>;
    async fn get_role(&self, org: &OrgId, id: &str) -> StoreResult<Option<Role>>;
    async fn save_role(&self, org: &OrgId, role: &Role, expected_version: u64) -> StoreResult<Role>;
    async fn delete_role(&self, org: &OrgId, id: &str) -> StoreResult<()>;

    async fn list_assignments(&self, org: &OrgId) -> StoreResult<Vec<UserAssignment>>;
    async fn get_assignment(&self, org: &OrgId, subject: &str) -> StoreResult<Option<UserAssignment>>;
    async fn find_assignment_by_email(&self, org: &OrgId, email: &str) -> StoreResult<Option<UserAssignment>>;
    async fn save_assignment(&self, org: &OrgId, assignment: &UserAssignment, expected_version: u64) -> StoreResult<UserAssignment>;
}
