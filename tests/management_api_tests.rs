//! Unit management and RBAC administration routes.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use statesman::config::ServerConfig;
use statesman::identity::{EMAIL_HEADER, SUBJECT_HEADER};
use statesman::server::{build_router, build_state, AppState};

async fn app() -> (Router, AppState) {
    let state = build_state(&ServerConfig::default()).await.unwrap();
    (build_router(state.clone()), state)
}

async fn call(app: &Router, subject: &str, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(SUBJECT_HEADER, subject)
        .header(EMAIL_HEADER, format!("{subject}@x.com"))
        .header("x-org", "acme");
    let req = match body {
        Some(body) => builder.header("content-type", "application/json").body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
    (status, value)
}

async fn raw(app: &Router, subject: &str, method: &str, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header(SUBJECT_HEADER, subject)
        .header("x-org", "acme")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    (status, to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec())
}

#[tokio::test]
async fn unit_crud_over_http() {
    let (app, state) = app().await;
    let (status, created) = call(&app, "alice", "POST", "/v1/units", Some(json!({ "name": "team/app" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], "team/app");

    let (status, _) = call(&app, "alice", "POST", "/v1/units", Some(json!({ "name": "team/app" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, meta) = call(&app, "alice", "GET", "/v1/units/team__app", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(meta["id"], "team/app");

    state.flush_background().await;
    let (_, listed) = call(&app, "alice", "GET", "/v1/units?prefix=team/", None).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["units"][0]["id"], "team/app");

    assert_eq!(call(&app, "alice", "DELETE", "/v1/units/team__app", None).await.0, StatusCode::NO_CONTENT);
    assert_eq!(call(&app, "alice", "GET", "/v1/units/team__app", None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_unit_name_is_bad_request() {
    let (app, _) = app().await;
    let (status, body) = call(&app, "alice", "POST", "/v1/units", Some(json!({ "name": "a/../b" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains(".."));
}

#[tokio::test]
async fn upload_download_versions_and_restore() {
    let (app, _) = app().await;
    call(&app, "alice", "POST", "/v1/units", Some(json!({ "name": "net/vpc" }))).await;

    let (status, body) = raw(&app, "alice", "POST", "/v1/units/net__vpc/upload", "{\"serial\":1}").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("uploaded"));
    raw(&app, "alice", "POST", "/v1/units/net__vpc/upload", "{\"serial\":2}").await;

    let (status, body) = raw(&app, "alice", "GET", "/v1/units/net__vpc/download", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"{\"serial\":2}");

    let (_, versions) = call(&app, "alice", "GET", "/v1/units/net__vpc/versions", None).await;
    assert_eq!(versions["unit_id"], "net/vpc");
    assert_eq!(versions["count"], 1);
    let timestamp = versions["versions"][0]["timestamp"].clone();

    let (status, restored) =
        call(&app, "alice", "POST", "/v1/units/net__vpc/restore", Some(json!({ "timestamp": timestamp }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["message"], "Version restored");
    assert_eq!(raw(&app, "alice", "GET", "/v1/units/net__vpc/download", "").await.1, b"{\"serial\":1}");

    let missing = json!({ "timestamp": "2001-01-01T00:00:00Z" });
    assert_eq!(call(&app, "alice", "POST", "/v1/units/net__vpc/restore", Some(missing)).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lock_and_unlock_over_management_api() {
    let (app, _) = app().await;
    call(&app, "alice", "POST", "/v1/units", Some(json!({ "name": "app" }))).await;

    let (status, lock) = call(&app, "alice", "POST", "/v1/units/app/lock", Some(json!({ "id": "L1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lock["who"], "alice");

    assert_eq!(call(&app, "bob", "POST", "/v1/units/app/lock", None).await.0, StatusCode::CONFLICT);
    assert_eq!(raw(&app, "alice", "POST", "/v1/units/app/upload", "{}").await.0, StatusCode::CONFLICT);
    assert_eq!(raw(&app, "alice", "POST", "/v1/units/app/upload?lock_id=L1", "{}").await.0, StatusCode::OK);

    assert_eq!(call(&app, "alice", "DELETE", "/v1/units/app/lock", Some(json!({ "id": "" }))).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(call(&app, "alice", "DELETE", "/v1/units/app/lock", Some(json!({ "id": "L2" }))).await.0, StatusCode::CONFLICT);
    let (status, body) = call(&app, "alice", "DELETE", "/v1/units/app/lock", Some(json!({ "id": "L1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Unit unlocked successfully");
}

#[tokio::test]
async fn status_of_unit_without_graph_is_green() {
    let (app, _) = app().await;
    call(&app, "alice", "POST", "/v1/units", Some(json!({ "name": "solo" }))).await;
    let (status, body) = call(&app, "alice", "GET", "/v1/units/solo/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unit_id"], "solo");
    assert_eq!(body["status"], "green");
    assert_eq!(call(&app, "alice", "GET", "/v1/units/ghost/status", None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rbac_bootstrap_and_assignment() {
    let (app, state) = app().await;
    for name in ["dev/app1", "prod/app1"] {
        call(&app, "alice", "POST", "/v1/units", Some(json!({ "name": name }))).await;
    }
    state.flush_background().await;

    let (_, me) = call(&app, "alice", "GET", "/v1/rbac/me", None).await;
    assert_eq!(me["rbac_enabled"], false);

    let (status, assignment) = call(&app, "alice", "POST", "/v1/rbac/init", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assignment["subject"], "alice");

    let (_, me) = call(&app, "alice", "GET", "/v1/rbac/me", None).await;
    assert_eq!(me["rbac_enabled"], true);
    assert_eq!(me["org"], "acme");

    // bob holds no role yet.
    assert_eq!(call(&app, "bob", "GET", "/v1/units/dev__app1", None).await.0, StatusCode::FORBIDDEN);
    assert_eq!(call(&app, "bob", "GET", "/v1/rbac/roles", None).await.0, StatusCode::FORBIDDEN);
    let (_, listed) = call(&app, "bob", "GET", "/v1/units", None).await;
    assert_eq!(listed["count"], 0);

    let rules = json!({
        "id": "dev-read",
        "name": "Dev read",
        "rules": [{ "actions": ["unit.read"], "resources": ["dev/*"], "effect": "allow" }]
    });
    assert_eq!(call(&app, "alice", "POST", "/v1/rbac/permissions", Some(rules)).await.0, StatusCode::CREATED);
    let role = json!({ "id": "dev-reader", "name": "Dev reader", "permissions": ["dev-read"] });
    assert_eq!(call(&app, "alice", "POST", "/v1/rbac/roles", Some(role)).await.0, StatusCode::CREATED);

    let (status, _) = call(&app, "alice", "POST", "/v1/rbac/users/assign", Some(json!({ "role_id": "dev-reader" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, assigned) =
        call(&app, "alice", "POST", "/v1/rbac/users/assign", Some(json!({ "subject": "bob", "role_id": "dev-reader" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assigned["roles"], json!(["dev-reader"]));

    assert_eq!(call(&app, "bob", "GET", "/v1/units/dev__app1", None).await.0, StatusCode::OK);
    assert_eq!(call(&app, "bob", "GET", "/v1/units/prod__app1", None).await.0, StatusCode::FORBIDDEN);
    let (_, listed) = call(&app, "bob", "GET", "/v1/units", None).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["units"][0]["id"], "dev/app1");

    let (_, users) = call(&app, "alice", "GET", "/v1/rbac/users", None).await;
    assert_eq!(users.as_array().unwrap().len(), 2);

    let revoke = json!({ "subject": "bob", "role_id": "dev-reader" });
    assert_eq!(call(&app, "alice", "POST", "/v1/rbac/users/revoke", Some(revoke)).await.0, StatusCode::OK);
    assert_eq!(call(&app, "bob", "GET", "/v1/units/dev__app1", None).await.0, StatusCode::FORBIDDEN);
}
