//! Role-based access control over units.
//! Permissions bundle ordered allow/deny rules; roles bundle permissions; assignments bind
//! roles to subjects. Everything is scoped to an organization, and RBAC counts as enabled
//! for an org as soon as one permission exists there.

mod model;
mod matcher;
mod store;
mod manager;

pub use model::{Action, Effect, Permission, PermissionRule, Role, UserAssignment};
pub use matcher::{decide, glob_to_regex, resource_matches, rule_matches};
pub use store::RbacStore;
pub use manager::{RbacManager, ADMIN_ROLE, DEFAULT_ROLE, RBAC_RESOURCE};

#[cfg(test)]
mod matcher_tests;
