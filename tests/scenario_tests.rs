//! End-to-end scenarios through the full layer stack (RBAC gate, orchestration, index,
//! blob backend) as assembled by the server at startup.

use statesman::config::{Backend, ServerConfig};
use statesman::error::StoreError;
use statesman::identity::{OrgId, Principal, RequestContext};
use statesman::rbac::{Action, DEFAULT_ROLE};
use statesman::server::{build_state, AppState};
use statesman::storage::{content_hash, LockInfo, UnitStore};

fn system(org: &str) -> RequestContext { RequestContext::system(OrgId::new(org)) }

fn user(subject: &str, org: &str) -> RequestContext { RequestContext::for_principal(Principal::new(subject), OrgId::new(org)) }

async fn memory_state() -> AppState { build_state(&ServerConfig::default()).await.unwrap() }

#[tokio::test]
async fn scenario_a_lock_protected_upload_archives_prior_content() {
    let state = memory_state().await;
    let ctx = system("default");
    let store = &state.store;

    store.create(&ctx, "team/app").await.unwrap();
    store.upload(&ctx, "team/app", b"{\"serial\":1}", "").await.unwrap();
    store.lock(&ctx, "team/app", &LockInfo::new("L1", "alice")).await.unwrap();
    assert_eq!(store.upload(&ctx, "team/app", b"{\"serial\":2}", "").await, Err(StoreError::LockConflict));
    store.upload(&ctx, "team/app", b"{\"serial\":2}", "L1").await.unwrap();

    let versions = store.list_versions(&ctx, "team/app").await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].hash, content_hash(b"{\"serial\":1}"));

    store.unlock(&ctx, "team/app", "L1").await.unwrap();
    assert_eq!(store.get_lock(&ctx, "team/app").await.unwrap(), None);
    assert_eq!(store.download(&ctx, "team/app").await.unwrap(), b"{\"serial\":2}");

    state.flush_background().await;
    let listed = store.list(&ctx, "team/").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].locked);
}

#[tokio::test]
async fn scenario_b_initialize_rbac_then_default_role() {
    let state = memory_state().await;
    let org = OrgId::new("acme");
    let sys = system("acme");
    for id in ["dev/app1", "prod/app1"] {
        state.store.create(&sys, id).await.unwrap();
    }
    state.flush_background().await;

    state.rbac.initialize_rbac(&org, "alice", "alice@x.com").await.unwrap();
    let alice = user("alice", "acme");
    assert!(state.store.upload(&alice, "prod/app1", b"{}", "").await.is_ok());
    assert!(state.rbac.can(&org, &Principal::new("alice"), Action::Manage, "rbac").await.unwrap());

    let bob = Principal::new("bob");
    let ids = vec!["dev/app1".to_string(), "prod/app1".to_string()];
    assert!(state.rbac.filter_units_by_read_access(&org, &bob, ids.clone()).await.unwrap().is_empty());
    assert!(state.store.list(&user("bob", "acme"), "").await.unwrap().is_empty());
    assert_eq!(state.store.get(&user("bob", "acme"), "dev/app1").await, Err(StoreError::Forbidden));

    state.rbac.assign_role(&org, "bob", "bob@x.com", DEFAULT_ROLE).await.unwrap();
    let bob_ctx = user("bob", "acme");
    assert!(state.store.download(&bob_ctx, "dev/app1").await.is_ok());
    assert_eq!(state.rbac.filter_units_by_read_access(&org, &bob, ids.clone()).await.unwrap(), ids);
    assert_eq!(state.store.upload(&bob_ctx, "dev/app1", b"{}", "").await, Err(StoreError::Forbidden));
}

#[tokio::test]
async fn rbac_is_scoped_per_org() {
    let state = memory_state().await;
    state.store.create(&system("default"), "shared/app").await.unwrap();
    state.rbac.initialize_rbac(&OrgId::new("acme"), "alice", "").await.unwrap();

    // acme has RBAC on; the default org does not, so anyone authenticated passes there.
    assert_eq!(state.store.get(&user("mallory", "acme"), "shared/app").await, Err(StoreError::Forbidden));
    assert!(state.store.get(&user("mallory", "default"), "shared/app").await.is_ok());
}

#[tokio::test]
async fn fs_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig { backend: Backend::Fs, data_dir: dir.path().to_path_buf(), ..ServerConfig::default() };
    let ctx = system("default");

    let first = build_state(&config).await.unwrap();
    first.store.create(&ctx, "net/vpc").await.unwrap();
    first.store.upload(&ctx, "net/vpc", b"{\"serial\":1}", "").await.unwrap();
    first.store.upload(&ctx, "net/vpc", b"{\"serial\":2}", "").await.unwrap();
    first.flush_background().await;
    first.shutdown_background();

    // Startup reconciliation rebuilds the index from the directory.
    let second = build_state(&config).await.unwrap();
    let listed = second.store.list(&ctx, "").await.unwrap();
    assert_eq!(listed.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["net/vpc"]);
    assert_eq!(second.store.download(&ctx, "net/vpc").await.unwrap(), b"{\"serial\":2}");
    assert_eq!(second.store.list_versions(&ctx, "net/vpc").await.unwrap().len(), 1);
}

#[tokio::test]
async fn restore_brings_back_archived_content() {
    let state = memory_state().await;
    let ctx = system("default");
    state.store.create(&ctx, "app").await.unwrap();
    state.store.upload(&ctx, "app", b"{\"serial\":1}", "").await.unwrap();
    state.store.upload(&ctx, "app", b"{\"serial\":2}", "").await.unwrap();

    let versions = state.store.list_versions(&ctx, "app").await.unwrap();
    let first = versions.last().unwrap().timestamp;
    state.store.restore_version(&ctx, "app", first, "").await.unwrap();
    assert_eq!(state.store.download(&ctx, "app").await.unwrap(), b"{\"serial\":1}");
    assert_eq!(state.store.list_versions(&ctx, "app").await.unwrap().len(), 2);
}
