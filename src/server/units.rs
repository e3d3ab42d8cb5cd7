//! Unit management API. Unit ids in the path are `/`-free: each `/` is written `__`.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::backend::LOCK_ID_HEADER;
use super::context::request_context;
use super::AppState;
use crate::deps::{UnitStatus, GRAPH_UNIT_ID};
use crate::error::{AppError, AppResult};
use crate::storage::{decode_unit_id, LockInfo, UnitMetadata};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/units", post(create_unit).get(list_units))
        .route("/v1/units/{id}", get(get_unit).delete(delete_unit))
        .route("/v1/units/{id}/download", get(download_unit))
        .route("/v1/units/{id}/upload", post(upload_unit))
        .route("/v1/units/{id}/lock", post(lock_unit).delete(unlock_unit))
        .route("/v1/units/{id}/versions", get(list_versions))
        .route("/v1/units/{id}/restore", post(restore_version))
        .route("/v1/units/{id}/status", get(unit_status))
}

/// The reserved graph unit keeps its leading underscores.
fn path_unit_id(encoded: &str) -> String {
    if encoded == GRAPH_UNIT_ID { encoded.to_string() } else { decode_unit_id(encoded) }
}

#[derive(Debug, Deserialize)]
pub struct CreateUnitRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateUnitResponse {
    pub id: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ListUnitsResponse {
    pub units: Vec<UnitMetadata>,
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct LockUnitRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub who: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct UnlockUnitRequest {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct VersionEntry {
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct ListVersionsResponse {
    pub unit_id: String,
    pub versions: Vec<VersionEntry>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct RestoreVersionRequest {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub lock_id: String,
}

#[derive(Debug, Serialize)]
pub struct RestoreVersionResponse {
    pub unit_id: String,
    pub restored_timestamp: DateTime<Utc>,
    pub message: &'static str,
}

async fn create_unit(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<CreateUnitRequest>) -> AppResult<impl IntoResponse> {
    let ctx = request_context(&state, &headers)?;
    let meta = state.store.create(&ctx, &req.name).await?;
    info!(target: "statesman::units", operation = "create_unit", unit_id = %meta.id, subject = ctx.subject(), "unit created");
    Ok((StatusCode::CREATED, Json(CreateUnitResponse { id: meta.id, created: meta.updated })))
}

async fn list_units(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> AppResult<Json<ListUnitsResponse>> {
    let ctx = request_context(&state, &headers)?;
    let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
    let units = state.store.list(&ctx, prefix).await?;
    Ok(Json(ListUnitsResponse { count: units.len(), units }))
}

async fn get_unit(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> AppResult<Json<UnitMetadata>> {
    let ctx = request_context(&state, &headers)?;
    Ok(Json(state.store.get(&ctx, &path_unit_id(&id)).await?))
}

async fn delete_unit(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> AppResult<StatusCode> {
    let ctx = request_context(&state, &headers)?;
    let id = path_unit_id(&id);
    state.store.delete(&ctx, &id).await?;
    info!(target: "statesman::units", operation = "delete_unit", unit_id = %id, subject = ctx.subject(), "unit deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn download_unit(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> AppResult<impl IntoResponse> {
    let ctx = request_context(&state, &headers)?;
    let data = state.store.download(&ctx, &path_unit_id(&id)).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], data))
}

async fn upload_unit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let ctx = request_context(&state, &headers)?;
    let id = path_unit_id(&id);
    let lock_id = headers
        .get(LOCK_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.get("if_locked_by").cloned())
        .or_else(|| query.get("lock_id").cloned())
        .unwrap_or_default();
    state.store.upload(&ctx, &id, &body, &lock_id).await?;
    info!(target: "statesman::units", operation = "upload_unit", unit_id = %id, size_bytes = body.len(), "unit uploaded");
    Ok(Json(json!({ "message": "Unit uploaded successfully" })))
}

async fn lock_unit(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>, body: Bytes) -> AppResult<Json<LockInfo>> {
    let ctx = request_context(&state, &headers)?;
    let req: LockUnitRequest = if body.is_empty() {
        LockUnitRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::user("invalid_body".to_string(), format!("invalid lock request: {e}")))?
    };
    let who = if req.who.is_empty() { ctx.subject().to_string() } else { req.who };
    let lock = LockInfo {
        id: if req.id.is_empty() { uuid::Uuid::new_v4().to_string() } else { req.id },
        who,
        version: if req.version.is_empty() { "1.0.0".to_string() } else { req.version },
        created: Utc::now(),
    };
    let id = path_unit_id(&id);
    state.store.lock(&ctx, &id, &lock).await?;
    info!(target: "statesman::units", operation = "lock_unit", unit_id = %id, lock_id = %lock.id, "unit locked");
    Ok(Json(lock))
}

async fn unlock_unit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UnlockUnitRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let ctx = request_context(&state, &headers)?;
    if req.id.trim().is_empty() {
        return Err(AppError::user("lock_id_required", "Lock ID required"));
    }
    let id = path_unit_id(&id);
    state.store.unlock(&ctx, &id, &req.id).await?;
    info!(target: "statesman::units", operation = "unlock_unit", unit_id = %id, lock_id = %req.id, "unit unlocked");
    Ok(Json(json!({ "message": "Unit unlocked successfully" })))
}

async fn list_versions(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> AppResult<Json<ListVersionsResponse>> {
    let ctx = request_context(&state, &headers)?;
    let id = path_unit_id(&id);
    let versions: Vec<VersionEntry> = state
        .store
        .list_versions(&ctx, &id)
        .await?
        .into_iter()
        .map(|v| VersionEntry { timestamp: v.timestamp, hash: v.hash, size: v.size })
        .collect();
    Ok(Json(ListVersionsResponse { unit_id: id, count: versions.len(), versions }))
}

async fn restore_version(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RestoreVersionRequest>,
) -> AppResult<Json<RestoreVersionResponse>> {
    let ctx = request_context(&state, &headers)?;
    let id = path_unit_id(&id);
    state.store.restore_version(&ctx, &id, req.timestamp, &req.lock_id).await?;
    info!(target: "statesman::units", operation = "restore_version", unit_id = %id, timestamp = %req.timestamp, "version restored");
    Ok(Json(RestoreVersionResponse { unit_id: id, restored_timestamp: req.timestamp, message: "Version restored" }))
}

/// Dependency status; requires read access to the unit itself.
async fn unit_status(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> AppResult<Json<UnitStatus>> {
    let ctx = request_context(&state, &headers)?;
    let meta = state.store.get(&ctx, &path_unit_id(&id)).await?;
    Ok(Json(state.graph.unit_status(&meta.id).await?))
}
