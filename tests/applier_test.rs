use std::collections::HashMap;
use std::sync::Arc;

use schemasync::audit::MemoryAuditLog;
use schemasync::cluster::{ClusterPool, ExecError, MemoryCluster, SqlExecutor};
use schemasync::ddl::PolicyMode;
use schemasync::engine::{ChangeApplier, ChangeRequest, ChangeSpec, EngineSettings, SyncContext};
use schemasync::schema::{Column, NamingResolver, Relationship, RelationshipType, SchemaDesign, Table};
use schemasync::state::models::{ChangeStatus, Project, ProjectStatus};
use schemasync::state::{MasterStore, SqliteMaster};
use schemasync::SyncError;

const ORG: &str = "acme-corp";
const NS: &str = "org_acmecorp";
const PROJECT: &str = "p1";

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    store: Arc<SqliteMaster>,
    cluster: Arc<MemoryCluster>,
    audit: Arc<MemoryAuditLog>,
    applier: ChangeApplier,
}

async fn harness_with(design: SchemaDesign) -> Harness {
    let store = Arc::new(SqliteMaster::open_memory().unwrap());
    store.initialize().await.unwrap();
    store.upsert_organization(ORG, "Acme").await.unwrap();
    store
        .create_project(&Project::new(PROJECT, ORG, "Shop", design))
        .await
        .unwrap();

    let cluster = Arc::new(MemoryCluster::new("primary"));
    let pool = Arc::new(ClusterPool::new(HashMap::new()));
    pool.register("primary", cluster.clone());
    let audit = Arc::new(MemoryAuditLog::new());

    let ctx = Arc::new(SyncContext::new(
        store.clone(),
        pool,
        audit.clone(),
        NamingResolver::default(),
        EngineSettings::default(),
    ));
    Harness {
        store,
        cluster,
        audit,
        applier: ChangeApplier::new(ctx),
    }
}

async fn harness() -> Harness {
    harness_with(SchemaDesign::default()).await
}

fn users(id: &str) -> Table {
    Table {
        id: id.to_string(),
        name: "users".to_string(),
        internal_name: None,
        columns: vec![
            Column::new("id", "UUID").primary_key(),
            Column::new("email", "TEXT").unique().not_null(),
        ],
    }
}

fn request(change: ChangeSpec) -> ChangeRequest {
    ChangeRequest {
        organization_id: ORG.to_string(),
        project_id: PROJECT.to_string(),
        change,
        created_by: Some("tester".to_string()),
    }
}

fn add_table(table: Table) -> ChangeRequest {
    request(ChangeSpec {
        change_type: "add_table".to_string(),
        table: Some(table.id.clone()),
        table_def: Some(table),
        ..Default::default()
    })
}

fn on_table(change_type: &str, table: &str) -> ChangeSpec {
    ChangeSpec {
        change_type: change_type.to_string(),
        table: Some(table.to_string()),
        ..Default::default()
    }
}

fn for_project(project_id: &str, mut request: ChangeRequest) -> ChangeRequest {
    request.project_id = project_id.to_string();
    request
}

async fn add_project(h: &Harness, project_id: &str) {
    h.store
        .create_project(&Project::new(project_id, ORG, "Other", SchemaDesign::default()))
        .await
        .unwrap();
}

async fn version(h: &Harness) -> i64 {
    h.store.get_project(PROJECT).await.unwrap().unwrap().version
}

// ─── Single changes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_users_table_lifecycle() {
    let h = harness().await;

    let created = h.applier.apply(&add_table(users("t1"))).await.unwrap();
    assert!(created.success);
    assert!(!created.already_exists);
    assert_eq!(created.internal_name.as_deref(), Some("t_t1"));
    assert_eq!(created.version, Some(2));
    assert!(created.sql[0]
        .starts_with("CREATE TABLE org_acmecorp.t_t1 (id UUID PRIMARY KEY, email TEXT NOT NULL UNIQUE"));
    assert!(created.policy_errors.is_empty());

    let table = h.cluster.table(NS, "t_t1").unwrap();
    assert!(table.rls_enabled);
    assert_eq!(table.policies.len(), 4);

    let mut change = on_table("add_column", "t1");
    change.column_def = Some(Column::new("age", "INTEGER"));
    let added = h.applier.apply(&request(change)).await.unwrap();
    assert_eq!(added.sql, vec!["ALTER TABLE org_acmecorp.t_t1 ADD COLUMN age INTEGER"]);
    assert_eq!(added.version, Some(3));

    let mut change = on_table("rename_column", "t1");
    change.old_name = Some("email".to_string());
    change.new_name = Some("user_email".to_string());
    let renamed = h.applier.apply(&request(change)).await.unwrap();
    assert_eq!(
        renamed.sql,
        vec!["ALTER TABLE org_acmecorp.t_t1 RENAME COLUMN email TO user_email"]
    );

    let project = h.store.get_project(PROJECT).await.unwrap().unwrap();
    let stored = project.schema.table("t1").unwrap();
    assert_eq!(stored.internal_name.as_deref(), Some("t_t1"));
    assert!(stored.column("user_email").is_some());
    assert!(stored.column("age").is_some());

    let dropped = h.applier.apply(&request(on_table("drop_table", "t1"))).await.unwrap();
    assert_eq!(dropped.sql, vec!["DROP TABLE IF EXISTS org_acmecorp.t_t1 CASCADE"]);
    assert_eq!(dropped.version, Some(5));
    assert!(h.cluster.table(NS, "t_t1").is_none());

    let log = h.audit.entries();
    let versions: Vec<Option<i64>> = log.iter().map(|c| c.version).collect();
    assert_eq!(versions, vec![Some(2), Some(3), Some(4), Some(5)]);
    assert!(log.iter().all(|c| c.status == ChangeStatus::Applied));
}

#[tokio::test]
async fn test_same_add_table_twice_reports_already_exists() {
    let h = harness().await;

    let first = h.applier.apply(&add_table(users("t1"))).await.unwrap();
    assert!(first.success);

    let second = h.applier.apply(&add_table(users("t1"))).await.unwrap();
    assert!(second.success);
    assert!(second.already_exists);
    assert_eq!(second.version, Some(2));
    assert_eq!(version(&h).await, 2);

    let entries = h.audit.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].status, ChangeStatus::Applied);
    assert_eq!(entries[1].version, None);
}

#[tokio::test]
async fn test_same_display_name_distinct_tables() {
    let h = harness().await;

    h.applier.apply(&add_table(users("t1"))).await.unwrap();
    h.applier.apply(&add_table(users("t2"))).await.unwrap();

    let names = h.cluster.table_names(NS);
    assert!(names.contains(&"t_t1".to_string()));
    assert!(names.contains(&"t_t2".to_string()));

    h.cluster.execute("SELECT * FROM org_acmecorp.t_t1").await.unwrap();
    h.cluster.execute("SELECT * FROM org_acmecorp.t_t2").await.unwrap();
}

#[tokio::test]
async fn test_uuid_spellings_get_their_own_tables() {
    let h = harness().await;

    let upper = h
        .applier
        .apply(&add_table(users("3F2504E0-4F89-11D3-9A0C-0305E82C3301")))
        .await
        .unwrap();
    let lower = h
        .applier
        .apply(&add_table(users("3f2504e0-4f89-11d3-9a0c-0305e82c3301")))
        .await
        .unwrap();

    assert_eq!(
        upper.internal_name.as_deref(),
        Some("t_3_f2504_e0_04_f89_011_d3_09_a0_c_00305_e82_c3301")
    );
    assert_eq!(
        lower.internal_name.as_deref(),
        Some("t_3f2504e0_04f89_011d3_09a0c_00305e82c3301")
    );
    assert!(upper.success && lower.success);
    assert!(!lower.already_exists);
    assert_eq!(version(&h).await, 3);
}

#[tokio::test]
async fn test_ids_differing_in_case_do_not_share_a_table() {
    let h = harness().await;
    add_project(&h, "p2").await;

    let first = h.applier.apply(&add_table(users("Users1"))).await.unwrap();
    let second = h
        .applier
        .apply(&for_project("p2", add_table(users("users1"))))
        .await
        .unwrap();

    assert!(first.success && second.success);
    assert!(!second.already_exists);
    assert_ne!(first.internal_name, second.internal_name);
    let names = h.cluster.table_names(NS);
    assert!(names.contains(&"t__users1".to_string()));
    assert!(names.contains(&"t_users1".to_string()));
}

#[tokio::test]
async fn test_table_owned_by_another_project_is_a_collision() {
    let h = harness().await;
    add_project(&h, "p2").await;
    h.applier.apply(&add_table(users("t1"))).await.unwrap();

    let mut other = users("t1");
    other.columns.push(Column::new("nickname", "TEXT"));
    let result = h
        .applier
        .apply(&for_project("p2", add_table(other)))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(!result.already_exists);
    assert!(result.error.as_deref().unwrap().contains("not part of project p2"));

    let p2 = h.store.get_project("p2").await.unwrap().unwrap();
    assert_eq!(p2.version, 1);
    assert!(p2.schema.tables.is_empty());
    // The first project's table is untouched.
    let table = h.cluster.table(NS, "t_t1").unwrap();
    assert!(table.columns.iter().all(|c| c.name != "nickname"));
    assert_eq!(h.audit.entries().pop().unwrap().status, ChangeStatus::Failed);
}

#[tokio::test]
async fn test_table_without_columns_is_noop() {
    let h = harness().await;
    let mut empty = users("t9");
    empty.columns.clear();

    let result = h.applier.apply(&add_table(empty)).await.unwrap();
    assert!(result.success);
    assert!(result.sql.is_empty());
    assert_eq!(version(&h).await, 1);
    assert!(h.cluster.executed().is_empty());
}

#[tokio::test]
async fn test_add_foreign_key_between_tables() {
    let h = harness().await;
    h.applier.apply(&add_table(users("t1"))).await.unwrap();
    let orders = Table {
        id: "t2".to_string(),
        name: "orders".to_string(),
        internal_name: None,
        columns: vec![
            Column::new("id", "UUID").primary_key(),
            Column::new("user_id", "UUID"),
        ],
    };
    h.applier.apply(&add_table(orders)).await.unwrap();

    let mut change = on_table("add_foreign_key", "t2");
    change.foreign_key = Some(schemasync::engine::ForeignKeySpec {
        column: "user_id".to_string(),
        references_table: "t1".to_string(),
        references_column: "id".to_string(),
        on_delete: None,
    });
    let result = h.applier.apply(&request(change)).await.unwrap();
    assert!(result.success);
    assert!(result.sql[0].contains("FOREIGN KEY (user_id) REFERENCES org_acmecorp.t_t1 (id)"));

    let project = h.store.get_project(PROJECT).await.unwrap().unwrap();
    assert_eq!(project.schema.relationships.len(), 1);
}

// ─── Failures ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_table_is_rejected_and_audited() {
    let h = harness().await;
    let mut change = on_table("add_column", "missing");
    change.column_def = Some(Column::new("age", "INTEGER"));

    let err = h.applier.apply(&request(change)).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownTable(_)));

    let entries = h.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, ChangeStatus::Failed);
    assert!(h.cluster.executed().is_empty());
}

#[tokio::test]
async fn test_unknown_change_type() {
    let h = harness().await;
    let err = h
        .applier
        .apply(&request(on_table("truncate_table", "t1")))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidChange(_)));
}

#[tokio::test]
async fn test_execution_failure_keeps_version() {
    let h = harness().await;
    h.applier.apply(&add_table(users("t1"))).await.unwrap();
    h.cluster
        .fail_on("ADD COLUMN", ExecError::new(Some("XX000"), "disk full"));

    let mut change = on_table("add_column", "t1");
    change.column_def = Some(Column::new("age", "INTEGER"));
    let result = h.applier.apply(&request(change)).await.unwrap();

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("disk full"));
    assert_eq!(version(&h).await, 2);

    let last = h.audit.entries().pop().unwrap();
    assert_eq!(last.status, ChangeStatus::Failed);
    assert_eq!(last.statements, vec!["ALTER TABLE org_acmecorp.t_t1 ADD COLUMN age INTEGER"]);
}

#[tokio::test]
async fn test_policy_failure_keeps_table_and_advances_version() {
    let h = harness().await;
    h.cluster
        .fail_on("t_t1_select_org", ExecError::new(Some("XX000"), "policy catalog locked"));

    let result = h.applier.apply(&add_table(users("t1"))).await.unwrap();

    assert!(result.success);
    assert_eq!(result.version, Some(2));
    assert_eq!(result.policy_errors.len(), 1);
    assert!(result.policy_errors[0].sql.contains("t_t1_select_org"));
    assert!(result.policy_errors[0].error.contains("policy catalog locked"));
    assert!(result.sql.iter().all(|s| !s.contains("t_t1_select_org")));

    // The remaining policies still ran.
    let table = h.cluster.table(NS, "t_t1").unwrap();
    assert!(table.rls_enabled);
    assert_eq!(table.policies.len(), 3);

    let project = h.store.get_project(PROJECT).await.unwrap().unwrap();
    assert_eq!(project.version, 2);
    assert!(project.schema.table("t1").is_some());

    let entry = h.audit.entries().pop().unwrap();
    assert_eq!(entry.status, ChangeStatus::Applied);
    assert!(entry.error_message.unwrap().contains("1 access policy statement(s) failed"));
}

#[tokio::test]
async fn test_missing_privilege_is_configuration_error() {
    let h = harness().await;
    h.cluster.deny_ddl(true);

    let err = h.applier.apply(&add_table(users("t1"))).await.unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
    assert_eq!(version(&h).await, 1);
}

#[tokio::test]
async fn test_unknown_project() {
    let h = harness().await;
    let mut req = add_table(users("t1"));
    req.project_id = "nope".to_string();
    let err = h.applier.apply(&req).await.unwrap_err();
    assert!(matches!(err, SyncError::UnknownProject(_)));
}

// ─── Full schema ─────────────────────────────────────────────────────────────

fn shop_design() -> SchemaDesign {
    let orders = Table {
        id: "t2".to_string(),
        name: "orders".to_string(),
        internal_name: None,
        columns: vec![
            Column::new("id", "UUID").primary_key(),
            Column::new("user_id", "UUID"),
        ],
    };
    SchemaDesign {
        tables: vec![users("t1"), orders],
        relationships: vec![Relationship {
            id: "r1".to_string(),
            source_table_id: "t2".to_string(),
            source_column: "user_id".to_string(),
            target_table_id: "t1".to_string(),
            target_column: "id".to_string(),
            relationship_type: RelationshipType::OneToMany,
            on_delete: None,
        }],
    }
}

#[tokio::test]
async fn test_apply_schema_creates_tables_and_foreign_keys() {
    let h = harness_with(shop_design()).await;

    let result = h
        .applier
        .apply_schema(ORG, PROJECT, &PolicyMode::Accessor)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.version, 1);
    assert_eq!(result.tables.len(), 2);
    assert_eq!(result.tables[0].internal_name, "t_t1");
    assert_eq!(result.foreign_keys.len(), 1);
    assert!(result.foreign_keys[0].success);

    let orders = h.cluster.table(NS, "t_t2").unwrap();
    assert!(orders.constraints.iter().any(|c| c.references.is_some()));

    let project = h.store.get_project(PROJECT).await.unwrap().unwrap();
    assert_eq!(project.version, 1);
    assert_eq!(project.status, ProjectStatus::Applied);
    assert!(project.schema.tables.iter().all(|t| t.internal_name.is_some()));
}

#[tokio::test]
async fn test_apply_schema_literal_policies() {
    let h = harness_with(shop_design()).await;
    h.applier
        .apply_schema(ORG, PROJECT, &PolicyMode::Literal(ORG.to_string()))
        .await
        .unwrap();

    assert!(h
        .cluster
        .executed()
        .iter()
        .any(|sql| sql.starts_with("CREATE POLICY") && sql.contains("'acme-corp'")));
}

#[tokio::test]
async fn test_apply_schema_continues_past_failed_table() {
    let h = harness_with(shop_design()).await;
    h.cluster.fail_on(
        "CREATE TABLE org_acmecorp.t_t1 ",
        ExecError::new(Some("XX000"), "out of space"),
    );

    let result = h
        .applier
        .apply_schema(ORG, PROJECT, &PolicyMode::Accessor)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.failed_tables().count(), 1);
    assert!(result.tables[1].success);
    // The relationship touches the failed table.
    assert!(result.foreign_keys.is_empty());
    assert!(h.cluster.table(NS, "t_t2").is_some());

    let project = h.store.get_project(PROJECT).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Failed);
}

#[tokio::test]
async fn test_apply_schema_policy_failure_does_not_stop_table() {
    let h = harness_with(shop_design()).await;
    h.cluster
        .fail_on("t_t1_select_org", ExecError::new(Some("XX000"), "policy catalog locked"));

    let result = h
        .applier
        .apply_schema(ORG, PROJECT, &PolicyMode::Accessor)
        .await
        .unwrap();

    assert!(result.success);
    let users = &result.tables[0];
    assert!(users.success);
    assert_eq!(users.policy_errors.len(), 1);
    assert!(users.sql.iter().all(|s| !s.contains("t_t1_select_org")));
    assert!(result.tables[1].policy_errors.is_empty());
    assert_eq!(result.foreign_keys.len(), 1);
    assert!(result.foreign_keys[0].success);

    let table = h.cluster.table(NS, "t_t1").unwrap();
    assert!(table.rls_enabled);
    assert_eq!(table.policies.len(), 3);
    assert_eq!(h.cluster.table(NS, "t_t2").unwrap().policies.len(), 4);

    let project = h.store.get_project(PROJECT).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Applied);
}

#[tokio::test]
async fn test_apply_schema_is_repeatable() {
    let h = harness_with(shop_design()).await;
    h.applier
        .apply_schema(ORG, PROJECT, &PolicyMode::Accessor)
        .await
        .unwrap();
    let again = h
        .applier
        .apply_schema(ORG, PROJECT, &PolicyMode::Accessor)
        .await
        .unwrap();
    assert!(again.success);
    assert!(again.tables.iter().all(|t| t.already_exists));
}

#[tokio::test]
async fn test_delete_project_drops_tables() {
    let h = harness_with(shop_design()).await;
    h.applier
        .apply_schema(ORG, PROJECT, &PolicyMode::Accessor)
        .await
        .unwrap();

    let result = h.applier.delete_project(ORG, PROJECT).await.unwrap();
    assert_eq!(result.dropped, vec!["t_t1".to_string(), "t_t2".to_string()]);
    let remaining = h.cluster.table_names(NS);
    assert!(!remaining.contains(&"t_t1".to_string()));
    assert!(!remaining.contains(&"t_t2".to_string()));
    assert!(h.cluster.has_namespace(NS));
    assert!(h.store.get_project(PROJECT).await.unwrap().is_none());
}
