//! RBAC administration. Every route except `/v1/rbac/me` needs `manage` on the `rbac`
//! resource; while RBAC is not yet enabled for the org any authenticated caller passes,
//! which is how the first administrator bootstraps it with `/v1/rbac/init`.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::context::request_context;
use super::AppState;
use crate::error::{AppError, AppResult, StoreError};
use crate::identity::RequestContext;
use crate::rbac::{Action, Permission, PermissionRule, Role, UserAssignment, RBAC_RESOURCE};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/rbac/init", post(init))
        .route("/v1/rbac/me", get(me))
        .route("/v1/rbac/permissions", get(list_permissions).post(create_permission))
        .route("/v1/rbac/permissions/{id}", delete(delete_permission))
        .route("/v1/rbac/roles", get(list_roles).post(create_role))
        .route("/v1/rbac/roles/{id}", delete(delete_role))
        .route("/v1/rbac/roles/{id}/permissions", post(add_role_permission))
        .route("/v1/rbac/users", get(list_users))
        .route("/v1/rbac/users/assign", post(assign_role))
        .route("/v1/rbac/users/revoke", post(revoke_role))
}

/// Context of a caller allowed to administer RBAC in its org.
async fn admin_context(state: &AppState, headers: &HeaderMap) -> AppResult<RequestContext> {
    let ctx = request_context(state, headers)?;
    let principal = ctx.require_principal()?;
    if !state.rbac.can(&ctx.org, principal, Action::Manage, RBAC_RESOURCE).await? {
        warn!(target: "statesman::rbac", org = %ctx.org, subject = %principal.subject, "rbac admin denied");
        return Err(StoreError::Forbidden.into());
    }
    Ok(ctx)
}

#[derive(Debug, Default, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub subject: String,
    pub email: String,
    pub org: String,
    pub rbac_enabled: bool,
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<PermissionRule>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RolePermissionRequest {
    pub permission_id: String,
}

/// Target of an assign/revoke: a subject, or an email already known to the org.
#[derive(Debug, Deserialize)]
pub struct AssignmentRequest {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub email: String,
    pub role_id: String,
}

async fn init(State(state): State<AppState>, headers: HeaderMap, body: Option<Json<InitRequest>>) -> AppResult<Json<UserAssignment>> {
    let ctx = admin_context(&state, &headers).await?;
    let principal = ctx.require_principal()?;
    let email = body.map(|Json(b)| b.email).filter(|e| !e.is_empty()).unwrap_or_else(|| principal.email.clone());
    state.rbac.initialize_rbac(&ctx.org, &principal.subject, &email).await?;
    info!(target: "statesman::rbac", org = %ctx.org, subject = %principal.subject, "rbac initialized");
    let assignment = state
        .rbac
        .get_assignment(&ctx.org, &principal.subject)
        .await?
        .ok_or_else(|| AppError::internal("internal", "assignment missing after init"))?;
    Ok(Json(assignment))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<MeResponse>> {
    let ctx = request_context(&state, &headers)?;
    let principal = ctx.require_principal()?;
    let roles = state.rbac.get_assignment(&ctx.org, &principal.subject).await?.map(|a| a.roles).unwrap_or_default();
    Ok(Json(MeResponse {
        subject: principal.subject.clone(),
        email: principal.email.clone(),
        org: ctx.org.to_string(),
        rbac_enabled: state.rbac.is_enabled(&ctx.org).await?,
        roles,
    }))
}

async fn list_permissions(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Vec<Permission>>> {
    let ctx = admin_context(&state, &headers).await?;
    Ok(Json(state.rbac.list_permissions(&ctx.org).await?))
}

async fn create_permission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePermissionRequest>,
) -> AppResult<impl IntoResponse> {
    let ctx = admin_context(&state, &headers).await?;
    let permission = state.rbac.create_permission(&ctx.org, &req.id, &req.name, &req.description, req.rules, ctx.subject()).await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

async fn delete_permission(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> AppResult<StatusCode> {
    let ctx = admin_context(&state, &headers).await?;
    state.rbac.delete_permission(&ctx.org, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_roles(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Vec<Role>>> {
    let ctx = admin_context(&state, &headers).await?;
    Ok(Json(state.rbac.list_roles(&ctx.org).await?))
}

async fn create_role(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<CreateRoleRequest>) -> AppResult<impl IntoResponse> {
    let ctx = admin_context(&state, &headers).await?;
    let role = state.rbac.create_role(&ctx.org, &req.id, &req.name, &req.description, req.permissions, ctx.subject()).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

async fn delete_role(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> AppResult<StatusCode> {
    let ctx = admin_context(&state, &headers).await?;
    state.rbac.delete_role(&ctx.org, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_role_permission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<RolePermissionRequest>,
) -> AppResult<Json<Role>> {
    let ctx = admin_context(&state, &headers).await?;
    Ok(Json(state.rbac.add_permission_to_role(&ctx.org, &id, &req.permission_id).await?))
}

async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Vec<UserAssignment>>> {
    let ctx = admin_context(&state, &headers).await?;
    Ok(Json(state.rbac.list_assignments(&ctx.org).await?))
}

async fn assign_role(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<AssignmentRequest>) -> AppResult<Json<UserAssignment>> {
    let ctx = admin_context(&state, &headers).await?;
    let assignment = if !req.subject.is_empty() {
        state.rbac.assign_role(&ctx.org, &req.subject, &req.email, &req.role_id).await?
    } else if !req.email.is_empty() {
        state.rbac.assign_role_by_email(&ctx.org, &req.email, &req.role_id).await?
    } else {
        return Err(AppError::user("target_required", "subject or email is required"));
    };
    info!(target: "statesman::rbac", org = %ctx.org, subject = %assignment.subject, role = %req.role_id, by = ctx.subject(), "role assigned");
    Ok(Json(assignment))
}

async fn revoke_role(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<AssignmentRequest>) -> AppResult<Json<UserAssignment>> {
    let ctx = admin_context(&state, &headers).await?;
    let assignment = if !req.subject.is_empty() {
        state.rbac.revoke_role(&ctx.org, &req.subject, &req.role_id).await?
    } else if !req.email.is_empty() {
        state.rbac.revoke_role_by_email(&ctx.org, &req.email, &req.role_id).await?
    } else {
        return Err(AppError::user("target_required", "subject or email is required"));
    };
    info!(target: "statesman::rbac", org = %ctx.org, subject = %assignment.subject, role = %req.role_id, by = ctx.subject(), "role revoked");
    Ok(Json(assignment))
}
