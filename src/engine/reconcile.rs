use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use super::applier::{ChangeApplier, SchemaApplyResult};
use super::{SyncContext, Target};
use crate::ddl::PolicyMode;
use crate::error::{SyncError, SyncResult};
use crate::schema::hash_prefix;

// ─── Classification ─────────────────────────────────────────────────────────

/// How the Slave's recorded state relates to the Master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    InSync,
    /// Slave is this many versions behind.
    BehindBy(i64),
    /// Slave recorded a newer version than the Master has. Never
    /// corrected automatically.
    SlaveAhead,
    /// No metadata recorded for the project.
    NotInitialized,
    /// Same version, different content.
    HashMismatch,
}

impl SyncState {
    pub fn needs_reconciliation(&self) -> bool {
        !matches!(self, SyncState::InSync)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::InSync => f.write_str("in_sync"),
            SyncState::BehindBy(n) => write!(f, "behind_by {}", n),
            SyncState::SlaveAhead => f.write_str("slave_ahead"),
            SyncState::NotInitialized => f.write_str("not_initialized"),
            SyncState::HashMismatch => f.write_str("hash_mismatch"),
        }
    }
}

/// Metadata row as recorded inside the tenant namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaveRecord {
    pub version: i64,
    pub hash: String,
    pub status: String,
    pub last_synced: Option<String>,
    pub last_error: Option<String>,
}

impl SlaveRecord {
    fn from_row(row: &Value) -> Option<Self> {
        Some(Self {
            version: row.get("schema_version")?.as_i64()?,
            hash: row.get("schema_hash")?.as_str()?.to_string(),
            status: row
                .get("sync_status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            last_synced: row
                .get("last_synced_at")
                .and_then(Value::as_str)
                .map(str::to_string),
            last_error: row.get("last_error").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// Compare Master `(version, hash)` with the Slave record.
pub fn classify(master_version: i64, master_hash: &str, slave: Option<&SlaveRecord>) -> SyncState {
    match slave {
        None => SyncState::NotInitialized,
        Some(s) if s.version < master_version => SyncState::BehindBy(master_version - s.version),
        Some(s) if s.version > master_version => SyncState::SlaveAhead,
        Some(s) if s.hash != master_hash => SyncState::HashMismatch,
        Some(_) => SyncState::InSync,
    }
}

// ─── Reports ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MasterSide {
    pub version: i64,
    pub hash_prefix: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SlaveSide {
    pub version: Option<i64>,
    pub hash_prefix: Option<String>,
    pub status: Option<String>,
    pub last_synced: Option<String>,
}

/// Sync verification response.
#[derive(Debug, Clone, Serialize)]
pub struct SyncVerification {
    pub synced: bool,
    pub state: SyncState,
    pub master: MasterSide,
    pub slave: SlaveSide,
    pub needs_reconciliation: bool,
    pub version_diff: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub before: SyncVerification,
    /// Versions whose recorded SQL was replayed, in order.
    pub replayed: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materialized: Option<SchemaApplyResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub after: SyncVerification,
}

/// A unique column of the design without a matching physical constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingConstraint {
    pub table_id: String,
    pub table_name: String,
    pub internal_name: String,
    pub column: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstraintRepair {
    pub repaired: Vec<MissingConstraint>,
    pub failed: Vec<(MissingConstraint, String)>,
    pub sql: Vec<String>,
}

// ─── Reconciler ─────────────────────────────────────────────────────────────

/// Detects and repairs drift between the Master design and the Slave.
pub struct Reconciler {
    ctx: Arc<SyncContext>,
}

impl Reconciler {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    async fn slave_record(&self, target: &Target, project_id: &str) -> SyncResult<Option<SlaveRecord>> {
        let select = target.ddl.select_metadata(project_id);
        match self.ctx.execute(target, &select).await {
            Ok(rows) => Ok(rows.first().and_then(SlaveRecord::from_row)),
            Err(SyncError::DdlExecution(e)) if e.is_missing_relation() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read both sides and classify. Read-only.
    pub async fn verify(&self, organization_id: &str, project_id: &str) -> SyncResult<SyncVerification> {
        let project = self.ctx.load_project(organization_id, project_id).await?;
        let target = self.ctx.target(organization_id).await?;
        let slave = self.slave_record(&target, project_id).await?;
        let state = classify(project.version, &project.schema_hash, slave.as_ref());

        let version_diff = project.version - slave.as_ref().map(|s| s.version).unwrap_or(0);
        Ok(SyncVerification {
            synced: state == SyncState::InSync,
            needs_reconciliation: state.needs_reconciliation(),
            state,
            master: MasterSide {
                version: project.version,
                hash_prefix: hash_prefix(&project.schema_hash),
            },
            slave: slave
                .map(|s| SlaveSide {
                    version: Some(s.version),
                    hash_prefix: Some(hash_prefix(&s.hash)),
                    status: Some(s.status),
                    last_synced: s.last_synced,
                })
                .unwrap_or_default(),
            version_diff,
        })
    }

    /// Classify, then repair what may be repaired automatically when
    /// `repair` is set: replay the missing tail of a Slave that is behind,
    /// or materialize the full design of an uninitialized one. Slaves that
    /// are ahead or carry a different hash are only reported.
    pub async fn reconcile(&self, organization_id: &str, project_id: &str, repair: bool) -> SyncResult<ReconcileReport> {
        let before = self.verify(organization_id, project_id).await?;
        let mut report = ReconcileReport {
            before: before.clone(),
            replayed: Vec::new(),
            materialized: None,
            error: None,
            after: before.clone(),
        };

        match before.state {
            SyncState::InSync => return Ok(report),
            SyncState::SlaveAhead | SyncState::HashMismatch => {
                warn!(
                    project = project_id,
                    state = %before.state,
                    "Slave diverged from master, manual reconciliation required"
                );
                return Ok(report);
            }
            _ if !repair => return Ok(report),
            SyncState::BehindBy(_) => {
                let from = before.slave.version.unwrap_or(0);
                if let Err(e) = self.replay(organization_id, project_id, from, &mut report.replayed).await {
                    report.error = Some(e.to_string());
                }
            }
            SyncState::NotInitialized => {
                let applier = ChangeApplier::new(Arc::clone(&self.ctx));
                let result = applier
                    .apply_schema(organization_id, project_id, &PolicyMode::Accessor)
                    .await?;
                if !result.success {
                    report.error = Some("full schema apply finished with failures".to_string());
                }
                report.materialized = Some(result);
            }
        }

        report.after = self.verify(organization_id, project_id).await?;
        Ok(report)
    }

    /// Re-execute recorded SQL of applied changes above `from_version`, in
    /// version order, advancing Slave metadata after each one. Stops at the
    /// first failure.
    async fn replay(
        &self,
        organization_id: &str,
        project_id: &str,
        from_version: i64,
        replayed: &mut Vec<i64>,
    ) -> SyncResult<()> {
        let target = self.ctx.target(organization_id).await?;
        self.ctx
            .provisioner
            .ensure_namespace(target.executor.as_ref(), &target.ddl)
            .await?;
        let applier = ChangeApplier::new(Arc::clone(&self.ctx));

        let changes = self.ctx.store.applied_changes_since(project_id, from_version).await?;
        info!(project = project_id, from_version, changes = changes.len(), "Replaying change log");

        for change in changes {
            let Some(version) = change.version else { continue };
            for sql in &change.statements {
                match self.ctx.execute_sql(&target, sql).await {
                    Ok(_) => {}
                    Err(SyncError::AlreadyExists(msg)) => {
                        warn!(project = project_id, version, detail = %msg, "Already exists during replay");
                    }
                    Err(e) => {
                        warn!(project = project_id, version, error = %e, "Replay stopped");
                        let mark = target.ddl.mark_metadata_failed(project_id, &e.to_string());
                        if let Err(mark_err) = self.ctx.execute(&target, &mark).await {
                            warn!(project = project_id, error = %mark_err, "Could not record failure in slave metadata");
                        }
                        return Err(e);
                    }
                }
            }
            let hash = change.schema_hash.clone().unwrap_or_default();
            applier.record_metadata(&target, project_id, version, &hash).await;
            replayed.push(version);
        }
        Ok(())
    }

    // ─── Constraint audit ───────────────────────────────────────────────────

    /// Unique and primary-key columns of the design that have no UNIQUE or
    /// PRIMARY KEY constraint on the physical column. Reports only.
    pub async fn audit_constraints(&self, organization_id: &str, project_id: &str) -> SyncResult<Vec<MissingConstraint>> {
        let project = self.ctx.load_project(organization_id, project_id).await?;
        let target = self.ctx.target(organization_id).await?;

        let rows = match self.ctx.execute(&target, &target.ddl.constraint_catalog()).await {
            Ok(rows) => rows,
            Err(SyncError::DdlExecution(e)) if e.is_missing_relation() => Vec::new(),
            Err(e) => return Err(e),
        };
        let present: HashSet<(String, String)> = rows
            .iter()
            .filter_map(|row| {
                Some((
                    row.get("table_name")?.as_str()?.to_string(),
                    row.get("column_name")?.as_str()?.to_string(),
                ))
            })
            .collect();

        let mut missing = Vec::new();
        for table in &project.schema.tables {
            let internal_name = table.physical_name(&self.ctx.naming);
            for column in table.user_columns().filter(|c| c.requires_unique_constraint()) {
                if !present.contains(&(internal_name.clone(), column.name.clone())) {
                    missing.push(MissingConstraint {
                        table_id: table.id.clone(),
                        table_name: table.name.clone(),
                        internal_name: internal_name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
        }

        if !missing.is_empty() {
            warn!(project = project_id, missing = missing.len(), "Missing unique constraints");
        }
        Ok(missing)
    }

    /// Add UNIQUE constraints for everything the audit reports missing.
    pub async fn repair_constraints(&self, organization_id: &str, project_id: &str) -> SyncResult<ConstraintRepair> {
        let missing = self.audit_constraints(organization_id, project_id).await?;
        let target = self.ctx.target(organization_id).await?;

        let mut report = ConstraintRepair {
            repaired: Vec::new(),
            failed: Vec::new(),
            sql: Vec::new(),
        };
        for item in missing {
            let statement = target.ddl.add_unique_constraint(&item.internal_name, &item.column)?;
            report.sql.push(statement.to_string());
            match self.ctx.execute(&target, &statement).await {
                Ok(_) | Err(SyncError::AlreadyExists(_)) => {
                    info!(table = %item.internal_name, column = %item.column, "Unique constraint added");
                    report.repaired.push(item);
                }
                Err(e) => {
                    warn!(table = %item.internal_name, column = %item.column, error = %e, "Constraint repair failed");
                    report.failed.push((item, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}
