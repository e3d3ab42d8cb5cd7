//! Per-request identity extraction shared by every handler.

use axum::http::HeaderMap;

use super::AppState;
use crate::error::AppResult;
use crate::identity::RequestContext;

/// Names the organization a request acts in; absent means the default org.
pub const ORG_HEADER: &str = "x-org";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Builds the `RequestContext` for a request. A missing principal is not rejected
/// here; the RBAC layer answers `Unauthorized` for any store call made without one.
pub fn request_context(state: &AppState, headers: &HeaderMap) -> AppResult<RequestContext> {
    let org_name = headers.get(ORG_HEADER).and_then(|v| v.to_str().ok());
    let org = state.orgs.resolve(org_name)?;
    let mut ctx = RequestContext::new(state.principals.principal(headers), org);
    if let Some(id) = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty()) {
        ctx.request_id = id.to_string();
    }
    Ok(ctx)
}
