use super::*;
use crate::error::StoreError;
use crate::rbac::{PermissionRule, RbacManager, RbacStore, UserAssignment};
use std::sync::Arc;

#[tokio::test]
async fn sync_contract_tracks_metadata_and_locks() {
    let index = MemoryIndex::new();
    index.ensure_unit("team/app").await.unwrap();
    index.ensure_unit("team/app").await.unwrap();
    let now = Utc::now();
    index.sync_metadata("team/app", 42, now).await.unwrap();
    index.sync_lock("team/app", &LockInfo::new("L1", "tf")).await.unwrap();
    index.ensure_unit("team/db").await.unwrap();
    index.ensure_unit("other/x").await.unwrap();

    let listed = index.list_units("team/").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, "team/app");
    assert_eq!(listed[0].size, 42);
    assert_eq!(listed[0].updated, now);
    assert!(listed[0].locked);

    index.sync_unlock("team/app").await.unwrap();
    assert!(!index.list_units("team/app").await.unwrap()[0].locked);

    index.delete_unit("team/app").await.unwrap();
    assert_eq!(index.list_units("").await.unwrap().len(), 2);
}

#[tokio::test]
async fn listing_for_principal_pushes_read_check_down() {
    let index = Arc::new(MemoryIndex::new());
    for id in ["dev/app1", "dev/app2", "prod/app1"] {
        index.ensure_unit(id).await.unwrap();
    }
    let org = OrgId::default();
    let bob = Principal::new("bob");

    // RBAC off: everything is visible
    assert_eq!(index.list_units_for_principal(&org, &bob, "").await.unwrap().len(), 3);

    let rbac = RbacManager::new(index.clone());
    rbac.create_permission(&org, "dev-read", "", "", vec![PermissionRule::allow(&[Action::Read], &["dev/*"])], "admin").await.unwrap();
    rbac.create_role(&org, "dev-reader", "", "", vec!["dev-read".into()], "admin").await.unwrap();

    // enabled but bob has no roles
    assert!(index.list_units_for_principal(&org, &bob, "").await.unwrap().is_empty());

    rbac.assign_role(&org, "bob", "bob@x.com", "dev-reader").await.unwrap();
    let ids: Vec<String> = index.list_units_for_principal(&org, &bob, "").await.unwrap().into_iter().map(|u| u.id).collect();
    assert_eq!(ids, vec!["dev/app1".to_string(), "dev/app2".to_string()]);

    assert!(index.can_perform_action(&org, &bob, Action::Read, "dev/app1").await.unwrap());
    assert!(!index.can_perform_action(&org, &bob, Action::Write, "dev/app1").await.unwrap());
    assert!(!index.can_perform_action(&org, &bob, Action::Read, "prod/app1").await.unwrap());

    // other orgs are untouched
    assert_eq!(index.list_units_for_principal(&OrgId::new("elsewhere"), &bob, "").await.unwrap().len(), 3);
}

#[tokio::test]
async fn optimistic_saves_reject_stale_versions() {
    let index = MemoryIndex::new();
    let org = OrgId::default();
    let now = Utc::now();
    let assignment = UserAssignment {
        subject: "alice".into(),
        email: "alice@x.com".into(),
        org_id: org.clone(),
        roles: vec![],
        created_at: now,
        updated_at: now,
        version: 0,
    };
    let v1 = index.save_assignment(&org, &assignment, 0).await.unwrap();
    assert_eq!(v1.version, 1);
    assert!(matches!(index.save_assignment(&org, &assignment, 0).await, Err(StoreError::VersionConflict(_))));
    let v2 = index.save_assignment(&org, &v1, 1).await.unwrap();
    assert_eq!(v2.version, 2);
    assert!(matches!(index.save_assignment(&org, &v1, 1).await, Err(StoreError::VersionConflict(_))));
}

#[tokio::test]
async fn snapshot_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rbac.json");
    let org = OrgId::new("acme");
    {
        let index = Arc::new(MemoryIndex::with_snapshot(&path).unwrap());
        let rbac = RbacManager::new(index.clone());
        rbac.initialize_rbac(&org, "alice", "alice@x.com").await.unwrap();
    }
    let reloaded = Arc::new(MemoryIndex::with_snapshot(&path).unwrap());
    assert!(reloaded.has_permissions(&org).await.unwrap());
    let alice = reloaded.get_assignment(&org, "alice").await.unwrap().unwrap();
    assert_eq!(alice.roles, vec!["admin".to_string()]);
    assert!(reloaded.list_units("").await.unwrap().is_empty(), "unit rows are not persisted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_rbac_writes_all_succeed_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rbac.json");
    let org = OrgId::new("acme");
    let index = Arc::new(MemoryIndex::with_snapshot(&path).unwrap());
    let rbac = Arc::new(RbacManager::new(index.clone()));

    let mut handles = Vec::new();
    for i in 0..200 {
        let rbac = rbac.clone();
        let org = org.clone();
        handles.push(tokio::spawn(async move {
            let rules = vec![PermissionRule::allow(&[Action::Read], &["dev/*"])];
            rbac.create_permission(&org, &format!("p{i}"), "", "", rules, "alice").await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(index.list_permissions(&org).await.unwrap().len(), 200);
    let reloaded = MemoryIndex::with_snapshot(&path).unwrap();
    assert_eq!(reloaded.list_permissions(&org).await.unwrap().len(), 200);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
        .collect();
    assert!(leftovers.is_empty());
}
