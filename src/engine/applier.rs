use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::change::{plan_change, relationship_foreign_keys, ChangeRequest, SchemaChange};
use super::{SyncContext, Target};
use crate::ddl::{PolicyMode, Statement};
use crate::error::{SyncError, SyncResult};
use crate::schema::{compute_hash, Table};
use crate::state::models::{ChangeRecord, ChangeStatus, Project, ProjectStatus};

const SYNC_STATUS_SYNCED: &str = "synced";

// ─── Results ────────────────────────────────────────────────────────────────

/// Outcome of one logical change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyResult {
    pub success: bool,
    /// Statements sent to the cluster. Failed access-control statements are
    /// listed in `policy_errors` instead.
    pub sql: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub internal_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub already_exists: bool,
    /// Project version after the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policy_errors: Vec<PolicyFailure>,
}

/// An RLS or policy statement that failed after its table was created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyFailure {
    pub sql: String,
    pub error: String,
}

fn summarize_policy_errors(failures: &[PolicyFailure]) -> String {
    let errors: Vec<&str> = failures.iter().map(|f| f.error.as_str()).collect();
    format!("{} access policy statement(s) failed: {}", failures.len(), errors.join("; "))
}

/// Per-table part of a full-schema apply.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub table_id: String,
    pub table_name: String,
    pub internal_name: String,
    pub success: bool,
    pub already_exists: bool,
    pub sql: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policy_errors: Vec<PolicyFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForeignKeyOutcome {
    pub relationship_id: String,
    pub success: bool,
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of materializing a whole design.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaApplyResult {
    pub success: bool,
    pub version: i64,
    pub tables: Vec<TableOutcome>,
    pub foreign_keys: Vec<ForeignKeyOutcome>,
}

impl SchemaApplyResult {
    pub fn failed_tables(&self) -> impl Iterator<Item = &TableOutcome> {
        self.tables.iter().filter(|t| !t.success)
    }
}

/// Summary of a project deletion.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub dropped: Vec<String>,
    pub sql: Vec<String>,
}

// ─── Applier ────────────────────────────────────────────────────────────────

/// Executes logical changes against the tenant's cluster and records the
/// outcome in the Master.
pub struct ChangeApplier {
    ctx: Arc<SyncContext>,
}

enum StepOutcome {
    Executed,
    Absorbed,
}

impl ChangeApplier {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Run one statement, absorbing already-exists for statements whose
    /// intent is then satisfied.
    async fn step(&self, target: &Target, statement: &Statement) -> SyncResult<StepOutcome> {
        match self.ctx.execute(target, statement).await {
            Ok(_) => Ok(StepOutcome::Executed),
            Err(SyncError::AlreadyExists(msg)) if statement.tolerates_existing() => {
                warn!(
                    namespace = target.namespace(),
                    kind = statement.kind(),
                    detail = %msg,
                    "Already exists, continuing"
                );
                Ok(StepOutcome::Absorbed)
            }
            Err(e) => Err(e),
        }
    }

    async fn audit_failure(&self, record: &mut ChangeRecord, sql: &[String], error: &SyncError) {
        record.status = ChangeStatus::Failed;
        record.statements = sql.to_vec();
        record.error_message = Some(error.to_string());
        self.ctx.audit.record(record).await;
    }

    /// Apply one logical change end to end.
    ///
    /// Caller errors (unknown project/table/column, invalid payloads,
    /// configuration, version conflicts) are returned as `Err`. Execution
    /// failures produce `Ok` with `success == false`; in both cases a
    /// failed entry is written to the audit log.
    pub async fn apply(&self, request: &ChangeRequest) -> SyncResult<ApplyResult> {
        let org = request.organization_id.as_str();
        let project_id = request.project_id.as_str();
        let change_data = serde_json::to_value(&request.change).unwrap_or(serde_json::Value::Null);
        let mut record = ChangeRecord::new(project_id, org, &request.change.change_type, change_data);
        record.created_by = request.created_by.clone();

        let project = self.ctx.load_project(org, project_id).await?;

        let change = match SchemaChange::try_from(&request.change) {
            Ok(change) => change,
            Err(e) => {
                self.audit_failure(&mut record, &[], &e).await;
                return Err(e);
            }
        };

        let target = match self.ctx.target(org).await {
            Ok(target) => target,
            Err(e) => {
                self.audit_failure(&mut record, &[], &e).await;
                return Err(e);
            }
        };

        let plan = match plan_change(&change, &project.schema, &self.ctx.naming, &target.ddl) {
            Ok(plan) => plan,
            Err(e) => {
                self.audit_failure(&mut record, &[], &e).await;
                return Err(e);
            }
        };

        let mut result = ApplyResult {
            internal_name: Some(plan.internal_name.clone()),
            internal_names: vec![plan.internal_name.clone()],
            ..ApplyResult::default()
        };

        if plan.statements.is_empty() {
            info!(project = project_id, table = change.table_id(), "Table has no columns, nothing to apply");
            result.success = true;
            result.version = Some(project.version);
            return Ok(result);
        }

        if let Err(e) = self
            .ctx
            .provisioner
            .ensure_namespace(target.executor.as_ref(), &target.ddl)
            .await
        {
            self.audit_failure(&mut record, &[], &e).await;
            return Err(e);
        }

        info!(
            organization = org,
            project = project_id,
            namespace = target.namespace(),
            change_type = change.change_type(),
            table = %plan.internal_name,
            "Applying change"
        );

        let mut executed: Vec<String> = Vec::new();
        for (idx, statement) in plan.statements.iter().enumerate() {
            let sql = statement.to_string();
            let outcome = match statement {
                Statement::CreateTable { .. } => match self.ctx.execute(&target, statement).await {
                    Ok(_) => Ok(StepOutcome::Executed),
                    Err(SyncError::AlreadyExists(_)) => Ok(StepOutcome::Absorbed),
                    Err(e) => Err(e),
                },
                _ => self.step(&target, statement).await,
            };

            match outcome {
                Ok(StepOutcome::Executed) => executed.push(sql),
                Ok(StepOutcome::Absorbed) => {
                    executed.push(sql);
                    if idx == 0 && matches!(change, SchemaChange::AddTable(_)) {
                        if !plan.table_known {
                            // The physical table belongs to someone else.
                            let e = SyncError::AlreadyExists(format!(
                                "table {}.{} exists but is not part of project {}",
                                target.namespace(),
                                plan.internal_name,
                                project_id
                            ));
                            return Ok(self.fail(&target, &project, record, executed, result, e).await);
                        }
                        info!(
                            project = project_id,
                            table = %plan.internal_name,
                            "Table already exists, nothing to apply"
                        );
                        result.already_exists = true;
                        result.success = true;
                        result.sql = executed.clone();
                        result.version = Some(project.version);
                        record.status = ChangeStatus::Applied;
                        record.statements = executed;
                        record.applied_at = Some(chrono::Utc::now().to_rfc3339());
                        record.error_message = Some("already exists".to_string());
                        self.ctx.audit.record(&record).await;
                        return Ok(result);
                    }
                }
                Err(e) if statement.is_access_control() && !is_caller_error(&e) => {
                    warn!(
                        project = project_id,
                        table = %plan.internal_name,
                        kind = statement.kind(),
                        error = %e,
                        "Access policy failed, continuing"
                    );
                    result.policy_errors.push(PolicyFailure {
                        sql,
                        error: e.to_string(),
                    });
                }
                Err(e) if is_caller_error(&e) => {
                    executed.push(sql);
                    self.audit_failure(&mut record, &executed, &e).await;
                    return Err(e);
                }
                Err(e) => {
                    executed.push(sql);
                    return Ok(self.fail(&target, &project, record, executed, result, e).await);
                }
            }
        }

        result.sql = executed.clone();
        let (version, hash) = match self
            .ctx
            .tracker
            .bump_version(project_id, project.version, &plan.design)
            .await
        {
            Ok(bumped) => bumped,
            Err(e) => {
                error!(project = project_id, error = %e, "Change applied but version not advanced");
                self.audit_failure(&mut record, &executed, &e).await;
                return Err(e);
            }
        };

        self.record_metadata(&target, project_id, version, &hash).await;

        let applied_at = chrono::Utc::now().to_rfc3339();
        record.status = ChangeStatus::Applied;
        record.statements = executed;
        record.version = Some(version);
        record.schema_hash = Some(hash);
        record.applied_at = Some(applied_at.clone());
        if !result.policy_errors.is_empty() {
            record.error_message = Some(summarize_policy_errors(&result.policy_errors));
        }
        self.ctx.audit.record(&record).await;

        info!(project = project_id, version, "Change applied");
        result.success = true;
        result.applied_at = Some(applied_at);
        result.version = Some(version);
        Ok(result)
    }

    async fn fail(
        &self,
        target: &Target,
        project: &Project,
        mut record: ChangeRecord,
        executed: Vec<String>,
        mut result: ApplyResult,
        e: SyncError,
    ) -> ApplyResult {
        warn!(
            project = %project.id,
            namespace = target.namespace(),
            error = %e,
            "Change failed"
        );
        let mark = target.ddl.mark_metadata_failed(&project.id, &e.to_string());
        if let Err(mark_err) = self.ctx.execute(target, &mark).await {
            warn!(project = %project.id, error = %mark_err, "Could not record failure in slave metadata");
        }
        self.audit_failure(&mut record, &executed, &e).await;

        result.success = false;
        result.sql = executed;
        result.error = Some(e.to_string());
        result.version = Some(project.version);
        result
    }

    pub(crate) async fn record_metadata(&self, target: &Target, project_id: &str, version: i64, hash: &str) {
        let upsert = target
            .ddl
            .upsert_metadata(project_id, version, hash, SYNC_STATUS_SYNCED);
        if let Err(e) = self.ctx.execute(target, &upsert).await {
            warn!(project = project_id, version, error = %e, "Could not update slave metadata");
        }
    }

    // ─── Full schema ────────────────────────────────────────────────────────

    /// Materialize the whole current design: every table with its access
    /// policies (concurrently), then relationship foreign keys. Does not
    /// change the project version.
    pub async fn apply_schema(
        &self,
        organization_id: &str,
        project_id: &str,
        mode: &PolicyMode,
    ) -> SyncResult<SchemaApplyResult> {
        let mut project = self.ctx.load_project(organization_id, project_id).await?;
        let target = self.ctx.target(organization_id).await?;
        self.ctx
            .provisioner
            .ensure_namespace(target.executor.as_ref(), &target.ddl)
            .await?;

        // Resolve physical names once and persist them.
        let mut renamed = false;
        for table in project.schema.tables.iter_mut() {
            if table.internal_name.as_deref().map(str::trim).unwrap_or("").is_empty() {
                table.internal_name = Some(self.ctx.naming.internal_name(&table.id));
                renamed = true;
            }
        }
        if renamed {
            let hash = compute_hash(&project.schema);
            self.ctx.store.update_design(project_id, &project.schema, &hash).await?;
        }

        self.ctx
            .store
            .set_project_status(project_id, ProjectStatus::Applying)
            .await?;
        info!(
            organization = organization_id,
            project = project_id,
            namespace = target.namespace(),
            tables = project.schema.tables.len(),
            "Applying full schema"
        );

        let semaphore = Semaphore::new(self.ctx.settings.parallelism.max(1));
        let tables: Vec<TableOutcome> = join_all(project.schema.tables.iter().map(|table| {
            let semaphore = &semaphore;
            let target = &target;
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.apply_table(target, table, mode).await
            }
        }))
        .await;

        for outcome in tables.iter().filter(|t| !t.success) {
            let mut record = ChangeRecord::new(
                project_id,
                organization_id,
                "add_table",
                serde_json::json!({ "table": outcome.table_id }),
            );
            record.status = ChangeStatus::Failed;
            record.statements = outcome.sql.clone();
            record.error_message = outcome.error.clone();
            self.ctx.audit.record(&record).await;
        }

        let foreign_keys = self.apply_foreign_keys(&target, &project, &tables).await?;

        let success = tables.iter().all(|t| t.success) && foreign_keys.iter().all(|f| f.success);
        let mut all_sql: Vec<String> = tables.iter().flat_map(|t| t.sql.iter().cloned()).collect();
        all_sql.extend(foreign_keys.iter().map(|f| f.sql.clone()));

        let mut record = ChangeRecord::new(
            project_id,
            organization_id,
            "apply_schema",
            serde_json::json!({ "tables": tables.len(), "policy_mode": policy_label(mode) }),
        );
        record.statements = all_sql;
        record.schema_hash = Some(project.schema_hash.clone());

        let policy_errors: Vec<PolicyFailure> = tables
            .iter()
            .flat_map(|t| t.policy_errors.iter().cloned())
            .collect();
        if !policy_errors.is_empty() {
            warn!(project = project_id, failed = policy_errors.len(), "Some access policies were not created");
            record.error_message = Some(summarize_policy_errors(&policy_errors));
        }

        if success {
            self.record_metadata(&target, project_id, project.version, &project.schema_hash)
                .await;
            self.ctx
                .store
                .set_project_status(project_id, ProjectStatus::Applied)
                .await?;
            record.status = ChangeStatus::Applied;
            record.applied_at = Some(chrono::Utc::now().to_rfc3339());
            info!(project = project_id, version = project.version, "Full schema applied");
        } else {
            let failed = tables.iter().filter(|t| !t.success).count()
                + foreign_keys.iter().filter(|f| !f.success).count();
            let message = format!("{} step(s) failed", failed);
            let mark = target.ddl.mark_metadata_failed(project_id, &message);
            if let Err(e) = self.ctx.execute(&target, &mark).await {
                warn!(project = project_id, error = %e, "Could not record failure in slave metadata");
            }
            self.ctx
                .store
                .set_project_status(project_id, ProjectStatus::Failed)
                .await?;
            record.status = ChangeStatus::Failed;
            record.error_message = Some(match record.error_message.take() {
                Some(policies) => format!("{}; {}", message, policies),
                None => message,
            });
            warn!(project = project_id, failed, "Full schema apply finished with failures");
        }
        self.ctx.audit.record(&record).await;

        Ok(SchemaApplyResult {
            success,
            version: project.version,
            tables,
            foreign_keys,
        })
    }

    /// Create one table and its policies. Only a failed CREATE TABLE stops
    /// the table; RLS and policy failures are collected and the rest still
    /// run.
    async fn apply_table(&self, target: &Target, table: &Table, mode: &PolicyMode) -> TableOutcome {
        let internal_name = table.physical_name(&self.ctx.naming);
        let mut outcome = TableOutcome {
            table_id: table.id.clone(),
            table_name: table.name.clone(),
            internal_name: internal_name.clone(),
            success: false,
            already_exists: false,
            sql: Vec::new(),
            error: None,
            policy_errors: Vec::new(),
        };

        let statements = match build_table_statements(target, &internal_name, table, mode) {
            Ok(statements) => statements,
            Err(e) => {
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        for (idx, statement) in statements.iter().enumerate() {
            let sql = statement.to_string();
            let result = if idx == 0 {
                match self.ctx.execute(target, statement).await {
                    Ok(_) => Ok(StepOutcome::Executed),
                    Err(SyncError::AlreadyExists(_)) => Ok(StepOutcome::Absorbed),
                    Err(e) => Err(e),
                }
            } else {
                self.step(target, statement).await
            };
            match result {
                Ok(StepOutcome::Absorbed) if idx == 0 => {
                    debug!(table = %internal_name, "Table already exists");
                    outcome.already_exists = true;
                    outcome.sql.push(sql);
                }
                Ok(_) => outcome.sql.push(sql),
                Err(e) if idx > 0 => {
                    warn!(table = %internal_name, kind = statement.kind(), error = %e, "Access policy failed, continuing");
                    outcome.policy_errors.push(PolicyFailure {
                        sql,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    outcome.sql.push(sql);
                    warn!(table = %internal_name, error = %e, "Table apply failed");
                    outcome.error = Some(e.to_string());
                    return outcome;
                }
            }
        }

        outcome.success = true;
        outcome
    }

    async fn apply_foreign_keys(
        &self,
        target: &Target,
        project: &Project,
        tables: &[TableOutcome],
    ) -> SyncResult<Vec<ForeignKeyOutcome>> {
        let ready = |table_id: &str| tables.iter().any(|t| t.table_id == table_id && t.success);
        let statements = relationship_foreign_keys(&project.schema, &self.ctx.naming, &target.ddl)?;

        let mut outcomes = Vec::new();
        for (relationship_id, statement) in statements {
            let Some(relationship) = project.schema.relationships.iter().find(|r| r.id == relationship_id) else {
                continue;
            };
            if !ready(&relationship.source_table_id) || !ready(&relationship.target_table_id) {
                debug!(relationship = %relationship_id, "Skipping foreign key of failed table");
                continue;
            }
            let sql = statement.to_string();
            let outcome = match self.step(target, &statement).await {
                Ok(_) => ForeignKeyOutcome {
                    relationship_id,
                    success: true,
                    sql,
                    error: None,
                },
                Err(e) => {
                    warn!(relationship = %relationship_id, error = %e, "Foreign key failed");
                    ForeignKeyOutcome {
                        relationship_id,
                        success: false,
                        sql,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    // ─── Deletion ───────────────────────────────────────────────────────────

    /// Drop every physical table of the project and its metadata row, then
    /// remove the Master record. The namespace is kept.
    pub async fn delete_project(&self, organization_id: &str, project_id: &str) -> SyncResult<DeleteResult> {
        let project = self.ctx.load_project(organization_id, project_id).await?;
        let target = self.ctx.target(organization_id).await?;
        self.ctx
            .provisioner
            .ensure_namespace(target.executor.as_ref(), &target.ddl)
            .await?;

        let mut dropped = Vec::new();
        let mut sql = Vec::new();
        for table in &project.schema.tables {
            let internal_name = table.physical_name(&self.ctx.naming);
            let statement = target.ddl.drop_table(&internal_name)?;
            self.ctx.execute(&target, &statement).await?;
            sql.push(statement.to_string());
            dropped.push(internal_name);
        }

        let delete = target.ddl.delete_metadata(project_id);
        match self.ctx.execute(&target, &delete).await {
            Ok(_) => sql.push(delete.to_string()),
            Err(e) => warn!(project = project_id, error = %e, "Could not delete slave metadata"),
        }

        self.ctx.store.delete_project(project_id).await?;

        let mut record = ChangeRecord::new(
            project_id,
            organization_id,
            "delete_project",
            serde_json::json!({ "tables": dropped }),
        );
        record.status = ChangeStatus::Applied;
        record.statements = sql.clone();
        record.applied_at = Some(chrono::Utc::now().to_rfc3339());
        self.ctx.audit.record(&record).await;

        info!(project = project_id, tables = dropped.len(), "Project deleted");
        Ok(DeleteResult { dropped, sql })
    }
}

fn build_table_statements(
    target: &Target,
    internal_name: &str,
    table: &Table,
    mode: &PolicyMode,
) -> SyncResult<Vec<Statement>> {
    let Some(create) = target.ddl.create_table(internal_name, &table.columns)? else {
        return Ok(Vec::new());
    };
    let mut statements = vec![create];
    statements.extend(target.ddl.access_policies(internal_name, mode)?);
    Ok(statements)
}

/// Errors that say the request itself is wrong; surfaced instead of being
/// folded into a failed result.
fn is_caller_error(e: &SyncError) -> bool {
    matches!(
        e,
        SyncError::Configuration(_)
            | SyncError::InvalidIdentifier(_)
            | SyncError::InvalidChange(_)
            | SyncError::UnknownTable(_)
            | SyncError::UnknownColumn { .. }
    )
}

fn policy_label(mode: &PolicyMode) -> &'static str {
    match mode {
        PolicyMode::Accessor => "accessor",
        PolicyMode::Literal(_) => "literal",
    }
}
