//! Request identity: who is calling and on behalf of which organization.
//! The principal is produced by a trusted upstream (token verification is not done here)
//! and travels with every store call inside a `RequestContext`.

mod principal;
mod org;
mod request_context;
mod supplier;

pub use principal::{Principal, SYSTEM_SUBJECT};
pub use org::{OrgId, OrgResolver, StaticOrgResolver, DEFAULT_ORG};
pub use request_context::RequestContext;
pub use supplier::{HeaderPrincipalSupplier, PrincipalSupplier, EMAIL_HEADER, GROUPS_HEADER, ROLES_HEADER, SUBJECT_HEADER};
