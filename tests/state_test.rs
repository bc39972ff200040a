use std::sync::Arc;

use schemasync::engine::VersionTracker;
use schemasync::schema::{compute_hash, Column, SchemaDesign, Table};
use schemasync::state::models::{
    ChangeRecord, ChangeStatus, DeploymentConfig, DeploymentStrategy, Project, ProjectStatus,
};
use schemasync::state::{MasterStore, SqliteMaster};
use schemasync::SyncError;
use tempfile::TempDir;

async fn create_test_store() -> (TempDir, SqliteMaster) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("master.db");
    let store = SqliteMaster::open(path.to_str().unwrap()).unwrap();
    store.initialize().await.unwrap();
    store.upsert_organization("acme", "Acme").await.unwrap();
    (dir, store)
}

fn design_with(columns: Vec<Column>) -> SchemaDesign {
    SchemaDesign {
        tables: vec![Table {
            id: "t1".to_string(),
            name: "users".to_string(),
            internal_name: Some("t_t1".to_string()),
            columns,
        }],
        relationships: vec![],
    }
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let (_dir, store) = create_test_store().await;
    // Should not error on second init
    store.initialize().await.unwrap();
    assert_eq!(store.list_organizations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("master.db");
    {
        let store = SqliteMaster::open(path.to_str().unwrap()).unwrap();
        store.initialize().await.unwrap();
        store.upsert_organization("acme", "Acme").await.unwrap();
        store
            .create_project(&Project::new("p1", "acme", "Shop", SchemaDesign::default()))
            .await
            .unwrap();
    }

    let store = SqliteMaster::open(path.to_str().unwrap()).unwrap();
    store.initialize().await.unwrap();
    let project = store.get_project("p1").await.unwrap().unwrap();
    assert_eq!(project.version, 1);
    assert_eq!(project.status, ProjectStatus::Active);
}

#[tokio::test]
async fn test_organization_upsert_renames() {
    let (_dir, store) = create_test_store().await;
    store.upsert_organization("acme", "Acme Inc").await.unwrap();
    let org = store.get_organization("acme").await.unwrap().unwrap();
    assert_eq!(org.name, "Acme Inc");
    assert!(store.get_organization("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_deployment_config_round_trip() {
    let (_dir, store) = create_test_store().await;
    assert!(store.get_deployment_config("acme").await.unwrap().is_none());

    let config = DeploymentConfig {
        organization_id: "acme".to_string(),
        strategy: DeploymentStrategy::Dedicated,
        endpoint: "eu-west".to_string(),
        namespace: "org_acme".to_string(),
    };
    store.upsert_deployment_config(&config).await.unwrap();
    assert_eq!(store.get_deployment_config("acme").await.unwrap(), Some(config));
}

#[tokio::test]
async fn test_project_ids_are_unique() {
    let (_dir, store) = create_test_store().await;
    let project = Project::new("p1", "acme", "Shop", SchemaDesign::default());
    store.create_project(&project).await.unwrap();
    assert!(store.create_project(&project).await.is_err());
    assert_eq!(store.list_projects("acme").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_compare_and_bump() {
    let (_dir, store) = create_test_store().await;
    store
        .create_project(&Project::new("p1", "acme", "Shop", SchemaDesign::default()))
        .await
        .unwrap();

    let design = design_with(vec![Column::new("id", "uuid").primary_key()]);
    let hash = compute_hash(&design);
    assert_eq!(store.compare_and_bump("p1", 1, &design, &hash).await.unwrap(), Some(2));
    // Stale expectation.
    assert_eq!(store.compare_and_bump("p1", 1, &design, &hash).await.unwrap(), None);

    let project = store.get_project("p1").await.unwrap().unwrap();
    assert_eq!(project.version, 2);
    assert_eq!(project.schema_hash, hash);
    assert_eq!(project.schema, design);
}

#[tokio::test]
async fn test_stale_bump_is_conflict_and_keeps_version() {
    let (_dir, store) = create_test_store().await;
    store
        .create_project(&Project::new("p1", "acme", "Shop", SchemaDesign::default()))
        .await
        .unwrap();
    let store: Arc<dyn MasterStore> = Arc::new(store);
    let tracker = VersionTracker::new(Arc::clone(&store));

    let design = design_with(vec![Column::new("id", "uuid").primary_key()]);
    let (version, _) = tracker.bump_version("p1", 1, &design).await.unwrap();
    assert_eq!(version, 2);

    let other = design_with(vec![Column::new("name", "text")]);
    let err = tracker.bump_version("p1", 1, &other).await.unwrap_err();
    assert!(err.is_retryable());
    match err {
        SyncError::Conflict {
            expected, actual, ..
        } => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        e => panic!("expected conflict, got {:?}", e),
    }

    let project = store.get_project("p1").await.unwrap().unwrap();
    assert_eq!(project.version, 2);
    assert_eq!(project.schema, design);
}

#[tokio::test]
async fn test_concurrent_bumps_only_one_wins() {
    let (_dir, store) = create_test_store().await;
    store
        .create_project(&Project::new("p1", "acme", "Shop", SchemaDesign::default()))
        .await
        .unwrap();
    let store: Arc<dyn MasterStore> = Arc::new(store);
    let tracker = VersionTracker::new(Arc::clone(&store));

    let mut handles = Vec::new();
    for i in 0..8 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            let design = design_with(vec![Column::new(&format!("c{}", i), "text")]);
            tracker.bump_version("p1", 1, &design).await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(SyncError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(store.get_project("p1").await.unwrap().unwrap().version, 2);
}

#[tokio::test]
async fn test_change_log_ordering() {
    let (_dir, store) = create_test_store().await;
    store
        .create_project(&Project::new("p1", "acme", "Shop", SchemaDesign::default()))
        .await
        .unwrap();

    for (version, status) in [
        (Some(3), ChangeStatus::Applied),
        (None, ChangeStatus::Failed),
        (Some(2), ChangeStatus::Applied),
    ] {
        let mut record = ChangeRecord::new("p1", "acme", "add_column", serde_json::json!({}));
        record.version = version;
        record.status = status;
        record.statements = vec![
            "ALTER TABLE org_acme.t_t1 ADD COLUMN x TEXT DEFAULT 'a;\nb'".to_string(),
            "COMMENT ON COLUMN org_acme.t_t1.x IS 'x'".to_string(),
        ];
        store.append_change(&record).await.unwrap();
    }

    let all = store.list_changes("p1").await.unwrap();
    let inserted: Vec<Option<i64>> = all.iter().map(|c| c.version).collect();
    assert_eq!(inserted, vec![Some(3), None, Some(2)]);
    assert_eq!(all[0].statements.len(), 2);
    assert_eq!(all[0].statements[0], "ALTER TABLE org_acme.t_t1 ADD COLUMN x TEXT DEFAULT 'a;\nb'");

    let since = store.applied_changes_since("p1", 1).await.unwrap();
    let versions: Vec<Option<i64>> = since.iter().map(|c| c.version).collect();
    assert_eq!(versions, vec![Some(2), Some(3)]);

    assert_eq!(store.applied_changes_since("p1", 2).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_project() {
    let (_dir, store) = create_test_store().await;
    store
        .create_project(&Project::new("p1", "acme", "Shop", SchemaDesign::default()))
        .await
        .unwrap();
    store.set_project_status("p1", ProjectStatus::Applied).await.unwrap();
    assert_eq!(
        store.get_project("p1").await.unwrap().unwrap().status,
        ProjectStatus::Applied
    );

    store.delete_project("p1").await.unwrap();
    assert!(store.get_project("p1").await.unwrap().is_none());
}
