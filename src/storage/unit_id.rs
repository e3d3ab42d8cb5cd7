use crate::error::{StoreError, StoreResult};

/// Canonical form of a unit id: slash-separated segments, no empty segments, no
/// leading or trailing slash. Ids containing `..` are rejected outright.
pub fn normalize_unit_id(raw: &str) -> StoreResult<String> {
    if raw.trim().is_empty() {
        return Err(StoreError::InvalidId("unit id is required".into()));
    }
    if raw.contains('\0') {
        return Err(StoreError::InvalidId("unit id contains NUL".into()));
    }
    if raw.contains("..") {
        return Err(StoreError::InvalidId(format!("unit id must not contain '..': {raw}")));
    }
    let segments: Vec<&str> = raw.split('/').map(str::trim).filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(StoreError::InvalidId(format!("unit id has no segments: {raw}")));
    }
    if segments.iter().any(|s| *s == ".") {
        return Err(StoreError::InvalidId(format!("unit id must not contain '.' segments: {raw}")));
    }
    Ok(segments.join("/"))
}

/// URL-path form used by the management API (`/` becomes `__`).
pub fn encode_unit_id(id: &str) -> String { id.replace('/', "__") }

pub fn decode_unit_id(encoded: &str) -> String { encoded.replace("__", "/") }
