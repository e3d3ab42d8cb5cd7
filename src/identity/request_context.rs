use super::{OrgId, Principal};
use crate::error::{StoreError, StoreResult};

/// Per-request scope threaded explicitly through every store call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Option<Principal>,
    pub org: OrgId,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(principal: Option<Principal>, org: OrgId) -> Self {
        Self { principal, org, request_id: uuid::Uuid::new_v4().to_string() }
    }

    pub fn for_principal(principal: Principal, org: OrgId) -> Self { Self::new(Some(principal), org) }

    pub fn anonymous(org: OrgId) -> Self { Self::new(None, org) }

    /// Context for trusted internal callers; bypasses RBAC.
    pub fn system(org: OrgId) -> Self { Self::new(Some(Principal::system()), org) }

    pub fn require_principal(&self) -> StoreResult<&Principal> {
        self.principal.as_ref().filter(|p| !p.subject.is_empty()).ok_or(StoreError::Unauthorized)
    }

    pub fn subject(&self) -> &str {
        self.principal.as_ref().map(|p| p.subject.as_str()).unwrap_or("")
    }
}
