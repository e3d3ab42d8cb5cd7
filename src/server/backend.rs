//! Terraform http backend protocol: `GET`, `POST`/`PUT`, `LOCK` and `UNLOCK` on one
//! path. LOCK and UNLOCK are non-standard methods, so the route accepts any method and
//! dispatches on its name.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::context::request_context;
use super::AppState;
use crate::error::{AppError, StoreError};
use crate::identity::RequestContext;
use crate::storage::LockInfo;

pub const LOCK_ID_HEADER: &str = "x-terraform-lock-id";

/// Body of a LOCK request; every field is optional and filled in by the server.
#[derive(Debug, Default, Deserialize)]
struct LockRequest {
    #[serde(default, alias = "ID")]
    id: Option<String>,
    #[serde(default, alias = "Who")]
    who: Option<String>,
    #[serde(default, alias = "Version")]
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UnlockRequest {
    #[serde(default, alias = "ID")]
    id: Option<String>,
}

fn log_outcome(operation: &str, unit_id: &str, outcome: &str, status: StatusCode) {
    if status.is_success() {
        info!(target: "statesman::backend", operation, unit_id, outcome, status = status.as_u16(), "backend request");
    } else {
        warn!(target: "statesman::backend", operation, unit_id, outcome, status = status.as_u16(), "backend request");
    }
}

fn error_body(status: StatusCode, message: &str) -> Response { (status, Json(json!({ "error": message }))).into_response() }

fn missing_unit(id: &str) -> Response {
    error_body(
        StatusCode::NOT_FOUND,
        &format!("Unit not found. Please create the unit first with POST /v1/units (name \"{id}\")."),
    )
}

fn store_failure(operation: &str, unit_id: &str, err: StoreError) -> Response {
    let app: AppError = err.into();
    let response = app.clone().into_response();
    log_outcome(operation, unit_id, app.code_str(), response.status());
    response
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Lock token for writes: header first, then `?ID=`, then `?id=`.
fn write_lock_id(headers: &HeaderMap, query: &HashMap<String, String>) -> String {
    header_value(headers, LOCK_ID_HEADER)
        .or_else(|| query.get("ID").filter(|v| !v.is_empty()).cloned())
        .or_else(|| query.get("id").filter(|v| !v.is_empty()).cloned())
        .unwrap_or_default()
}

pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = match request_context(&state, &headers) {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    match method.as_str() {
        "GET" => get_state(&state, &ctx, &id).await,
        "POST" | "PUT" => update_state(&state, &ctx, &id, &headers, &query, body).await,
        "LOCK" => lock_state(&state, &ctx, &id, &body).await,
        "UNLOCK" => unlock_state(&state, &ctx, &id, &headers, &body).await,
        other => {
            log_outcome(other, &id, "method_not_allowed", StatusCode::METHOD_NOT_ALLOWED);
            error_body(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
        }
    }
}

async fn get_state(state: &AppState, ctx: &RequestContext, id: &str) -> Response {
    match state.store.download(ctx, id).await {
        Ok(data) => {
            log_outcome("get", id, "ok", StatusCode::OK);
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], data).into_response()
        }
        Err(StoreError::NotFound(_)) => {
            log_outcome("get", id, "not_found", StatusCode::NOT_FOUND);
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => store_failure("get", id, e),
    }
}

async fn update_state(
    state: &AppState,
    ctx: &RequestContext,
    id: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    body: Bytes,
) -> Response {
    match state.store.get(ctx, id).await {
        Ok(_) => {}
        Err(StoreError::NotFound(_)) => {
            log_outcome("update", id, "not_found", StatusCode::NOT_FOUND);
            return missing_unit(id);
        }
        Err(e) => return store_failure("update", id, e),
    }

    let lock_id = write_lock_id(headers, query);
    match state.store.upload(ctx, id, &body, &lock_id).await {
        Ok(()) => {
            state.schedule_graph_update(id, body.to_vec()).await;
            log_outcome("update", id, "ok", StatusCode::OK);
            StatusCode::OK.into_response()
        }
        Err(StoreError::LockConflict) => {
            log_outcome("update", id, "lock_conflict", StatusCode::CONFLICT);
            match state.store.get_lock(ctx, id).await {
                Ok(Some(lock)) => (StatusCode::CONFLICT, Json(lock)).into_response(),
                _ => error_body(StatusCode::CONFLICT, "State is locked"),
            }
        }
        Err(e) => store_failure("update", id, e),
    }
}

async fn lock_state(state: &AppState, ctx: &RequestContext, id: &str, body: &[u8]) -> Response {
    let request: LockRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LockRequest::default()
    } else {
        match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => {
                log_outcome("lock", id, "invalid_body", StatusCode::BAD_REQUEST);
                return error_body(StatusCode::BAD_REQUEST, &format!("invalid lock body: {e}"));
            }
        }
    };
    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
    let lock = LockInfo {
        id: non_empty(request.id).unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        who: non_empty(request.who).unwrap_or_else(|| "terraform".to_string()),
        version: non_empty(request.version).unwrap_or_else(|| "1.0.0".to_string()),
        created: Utc::now(),
    };

    match state.store.lock(ctx, id, &lock).await {
        Ok(()) => {
            log_outcome("lock", id, "ok", StatusCode::OK);
            (StatusCode::OK, Json(lock)).into_response()
        }
        Err(StoreError::NotFound(_)) => {
            log_outcome("lock", id, "not_found", StatusCode::NOT_FOUND);
            missing_unit(id)
        }
        Err(StoreError::LockConflict) => match state.store.get_lock(ctx, id).await {
            Ok(Some(held)) => {
                log_outcome("lock", id, "locked", StatusCode::LOCKED);
                (StatusCode::LOCKED, Json(held)).into_response()
            }
            _ => {
                log_outcome("lock", id, "lock_conflict", StatusCode::CONFLICT);
                error_body(StatusCode::CONFLICT, "State is already locked")
            }
        },
        Err(e) => store_failure("lock", id, e),
    }
}

async fn unlock_state(state: &AppState, ctx: &RequestContext, id: &str, headers: &HeaderMap, body: &[u8]) -> Response {
    let from_body = serde_json::from_slice::<UnlockRequest>(body).ok().and_then(|r| r.id).filter(|s| !s.is_empty());
    let Some(lock_id) = from_body.or_else(|| header_value(headers, LOCK_ID_HEADER)) else {
        log_outcome("unlock", id, "missing_lock_id", StatusCode::BAD_REQUEST);
        return error_body(StatusCode::BAD_REQUEST, "Lock ID required");
    };

    match state.store.unlock(ctx, id, &lock_id).await {
        Ok(()) => {
            log_outcome("unlock", id, "ok", StatusCode::OK);
            StatusCode::OK.into_response()
        }
        Err(StoreError::NotFound(_)) => {
            log_outcome("unlock", id, "not_found", StatusCode::NOT_FOUND);
            error_body(StatusCode::NOT_FOUND, "State not found")
        }
        Err(StoreError::LockConflict) => {
            log_outcome("unlock", id, "lock_mismatch", StatusCode::CONFLICT);
            error_body(StatusCode::CONFLICT, "Lock ID mismatch")
        }
        Err(e) => store_failure("unlock", id, e),
    }
}
