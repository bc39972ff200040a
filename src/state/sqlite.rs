use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::backend::MasterStore;
use super::migration;
use super::models::*;
use crate::schema::SchemaDesign;

/// SQLite-backed Master store.
pub struct SqliteMaster {
    conn: Mutex<Connection>,
}

impl SqliteMaster {
    /// Open or create the Master database.
    pub fn open(db_path: &str) -> Result<Self> {
        let parent = Path::new(db_path).parent();
        if let Some(dir) = parent {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open master database at {}", db_path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("master database connection lock poisoned"))
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

const PROJECT_COLUMNS: &str =
    "id, organization_id, name, schema_json, version, schema_hash, status, created_at, updated_at";

const CHANGE_COLUMNS: &str = "id, project_id, organization_id, change_type, change_data, status, statements, \
     error_message, version, schema_hash, applied_at, created_by, created_at";

#[async_trait]
impl MasterStore for SqliteMaster {
    // ─── Initialization ─────────────────────────────────────────────────────

    async fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        migration::check_and_migrate(&conn)
    }

    // ─── Organizations ──────────────────────────────────────────────────────

    async fn upsert_organization(&self, id: &str, name: &str) -> Result<Organization> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO organizations (id, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![id, name, Self::now()],
        )?;
        let org = conn.query_row(
            "SELECT id, name, created_at FROM organizations WHERE id = ?1",
            params![id],
            |row| {
                Ok(Organization {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )?;
        Ok(org)
    }

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        let conn = self.conn()?;
        let org = conn
            .query_row(
                "SELECT id, name, created_at FROM organizations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Organization {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(org)
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM organizations ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Organization {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ─── Deployment Configs ─────────────────────────────────────────────────

    async fn get_deployment_config(&self, organization_id: &str) -> Result<Option<DeploymentConfig>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT organization_id, strategy, endpoint, namespace
                 FROM deployment_configs WHERE organization_id = ?1",
                params![organization_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(organization_id, strategy, endpoint, namespace)| {
            Ok(DeploymentConfig {
                organization_id,
                strategy: strategy.parse().map_err(|e: String| anyhow!(e))?,
                endpoint,
                namespace,
            })
        })
        .transpose()
    }

    async fn upsert_deployment_config(&self, config: &DeploymentConfig) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO deployment_configs (organization_id, strategy, endpoint, namespace, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(organization_id) DO UPDATE SET
                strategy = excluded.strategy,
                endpoint = excluded.endpoint,
                namespace = excluded.namespace,
                updated_at = excluded.updated_at",
            params![
                config.organization_id,
                config.strategy.as_str(),
                config.endpoint,
                config.namespace,
                Self::now()
            ],
        )?;
        Ok(())
    }

    // ─── Projects ───────────────────────────────────────────────────────────

    async fn create_project(&self, project: &Project) -> Result<()> {
        let schema_json = serde_json::to_string(&project.schema)?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO projects ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                PROJECT_COLUMNS
            ),
            params![
                project.id,
                project.organization_id,
                project.name,
                schema_json,
                project.version,
                project.schema_hash,
                project.status.as_str(),
                project.created_at,
                project.updated_at,
            ],
        )
        .with_context(|| format!("Failed to create project '{}'", project.id))?;
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
                params![id],
                ProjectRow::from_row,
            )
            .optional()?;
        row.map(ProjectRow::into_project).transpose()
    }

    async fn list_projects(&self, organization_id: &str) -> Result<Vec<Project>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM projects WHERE organization_id = ?1 ORDER BY created_at, id",
            PROJECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![organization_id], ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ProjectRow::into_project).collect()
    }

    async fn compare_and_bump(
        &self,
        project_id: &str,
        expected_version: i64,
        schema: &SchemaDesign,
        schema_hash: &str,
    ) -> Result<Option<i64>> {
        let schema_json = serde_json::to_string(schema)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE projects
             SET version = version + 1, schema_json = ?1, schema_hash = ?2, updated_at = ?3
             WHERE id = ?4 AND version = ?5",
            params![schema_json, schema_hash, Self::now(), project_id, expected_version],
        )?;
        Ok((updated == 1).then_some(expected_version + 1))
    }

    async fn update_design(&self, project_id: &str, schema: &SchemaDesign, schema_hash: &str) -> Result<()> {
        let schema_json = serde_json::to_string(schema)?;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE projects SET schema_json = ?1, schema_hash = ?2, updated_at = ?3 WHERE id = ?4",
            params![schema_json, schema_hash, Self::now(), project_id],
        )?;
        Ok(())
    }

    async fn set_project_status(&self, project_id: &str, status: ProjectStatus) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Self::now(), project_id],
        )?;
        Ok(())
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM schema_changes WHERE project_id = ?1", params![project_id])?;
        tx.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
        tx.commit()?;
        Ok(())
    }

    // ─── Change Log ─────────────────────────────────────────────────────────

    async fn append_change(&self, change: &ChangeRecord) -> Result<()> {
        let change_data = serde_json::to_string(&change.change_data)?;
        let statements = serde_json::to_string(&change.statements)?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO schema_changes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                CHANGE_COLUMNS
            ),
            params![
                change.id,
                change.project_id,
                change.organization_id,
                change.change_type,
                change_data,
                change.status.as_str(),
                statements,
                change.error_message,
                change.version,
                change.schema_hash,
                change.applied_at,
                change.created_by,
                change.created_at,
            ],
        )?;
        Ok(())
    }

    async fn list_changes(&self, project_id: &str) -> Result<Vec<ChangeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schema_changes WHERE project_id = ?1 ORDER BY seq",
            CHANGE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![project_id], ChangeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ChangeRow::into_change).collect()
    }

    async fn applied_changes_since(&self, project_id: &str, after_version: i64) -> Result<Vec<ChangeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM schema_changes
             WHERE project_id = ?1 AND status = 'applied' AND version > ?2
             ORDER BY version, seq",
            CHANGE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![project_id, after_version], ChangeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ChangeRow::into_change).collect()
    }
}

// ─── Row decoding ───────────────────────────────────────────────────────────

struct ProjectRow {
    id: String,
    organization_id: String,
    name: String,
    schema_json: String,
    version: i64,
    schema_hash: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            name: row.get(2)?,
            schema_json: row.get(3)?,
            version: row.get(4)?,
            schema_hash: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_project(self) -> Result<Project> {
        let schema: SchemaDesign = serde_json::from_str(&self.schema_json)
            .with_context(|| format!("Corrupt schema JSON for project '{}'", self.id))?;
        Ok(Project {
            status: self.status.parse().map_err(|e: String| anyhow!(e))?,
            id: self.id,
            organization_id: self.organization_id,
            name: self.name,
            schema,
            version: self.version,
            schema_hash: self.schema_hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ChangeRow {
    id: String,
    project_id: String,
    organization_id: String,
    change_type: String,
    change_data: String,
    status: String,
    statements: String,
    error_message: Option<String>,
    version: Option<i64>,
    schema_hash: Option<String>,
    applied_at: Option<String>,
    created_by: Option<String>,
    created_at: String,
}

impl ChangeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            organization_id: row.get(2)?,
            change_type: row.get(3)?,
            change_data: row.get(4)?,
            status: row.get(5)?,
            statements: row.get(6)?,
            error_message: row.get(7)?,
            version: row.get(8)?,
            schema_hash: row.get(9)?,
            applied_at: row.get(10)?,
            created_by: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_change(self) -> Result<ChangeRecord> {
        let statements: Vec<String> = serde_json::from_str(&self.statements)
            .with_context(|| format!("Corrupt statements in change {}", self.id))?;
        Ok(ChangeRecord {
            change_data: serde_json::from_str(&self.change_data).unwrap_or(serde_json::Value::Null),
            status: self.status.parse().map_err(|e: String| anyhow!(e))?,
            id: self.id,
            project_id: self.project_id,
            organization_id: self.organization_id,
            change_type: self.change_type,
            statements,
            error_message: self.error_message,
            version: self.version,
            schema_hash: self.schema_hash,
            applied_at: self.applied_at,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}
