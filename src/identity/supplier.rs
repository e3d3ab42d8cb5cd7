use axum::http::HeaderMap;
use base64::Engine;

use super::Principal;

pub const SUBJECT_HEADER: &str = "x-principal-subject";
pub const EMAIL_HEADER: &str = "x-principal-email";
pub const ROLES_HEADER: &str = "x-principal-roles";
pub const GROUPS_HEADER: &str = "x-principal-groups";

/// Produces the verified principal for a request. Implementations sit behind whatever
/// authenticated the caller; the store trusts their output.
pub trait PrincipalSupplier: Send + Sync {
    fn principal(&self, headers: &HeaderMap) -> Option<Principal>;
}

/// Reads a principal asserted by a trusted upstream proxy.
///
/// `X-Principal-Subject` wins; otherwise HTTP basic credentials (the only auth the
/// Terraform http backend can send) name the subject. Passwords are not checked here.
#[derive(Debug, Clone, Default)]
pub struct HeaderPrincipalSupplier;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|s| !s.is_empty())
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

fn basic_auth_subject(headers: &HeaderMap) -> Option<String> {
    let raw = header_str(headers, "authorization")?;
    let encoded = raw.strip_prefix("Basic ").or_else(|| raw.strip_prefix("basic "))?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let user = text.split(':').next().unwrap_or("").trim();
    if user.is_empty() { None } else { Some(user.to_string()) }
}

impl PrincipalSupplier for HeaderPrincipalSupplier {
    fn principal(&self, headers: &HeaderMap) -> Option<Principal> {
        let subject = header_str(headers, SUBJECT_HEADER).map(str::to_string).or_else(|| basic_auth_subject(headers))?;
        Some(Principal {
            subject,
            email: header_str(headers, EMAIL_HEADER).unwrap_or("").to_string(),
            roles: split_list(header_str(headers, ROLES_HEADER)),
            groups: split_list(header_str(headers, GROUPS_HEADER)),
        })
    }
}
