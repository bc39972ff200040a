use anyhow::Result;
use async_trait::async_trait;

use super::models::{ChangeRecord, DeploymentConfig, Organization, Project, ProjectStatus};
use crate::schema::SchemaDesign;

/// Persistence seam for Master records.
/// Implemented by SQLite; other stores only need this trait.
#[async_trait]
pub trait MasterStore: Send + Sync {
    // ─── Initialization ─────────────────────────────────────────────────────

    /// Create tables and run migrations.
    async fn initialize(&self) -> Result<()>;

    // ─── Organizations ──────────────────────────────────────────────────────

    /// Create an organization, or rename it if it exists.
    async fn upsert_organization(&self, id: &str, name: &str) -> Result<Organization>;

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>>;

    async fn list_organizations(&self) -> Result<Vec<Organization>>;

    // ─── Deployment Configs ─────────────────────────────────────────────────

    async fn get_deployment_config(&self, organization_id: &str) -> Result<Option<DeploymentConfig>>;

    async fn upsert_deployment_config(&self, config: &DeploymentConfig) -> Result<()>;

    // ─── Projects ───────────────────────────────────────────────────────────

    /// Insert a new project. Fails if the id is taken.
    async fn create_project(&self, project: &Project) -> Result<()>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self, organization_id: &str) -> Result<Vec<Project>>;

    /// Store a new design and advance the version by one, but only if the
    /// stored version still equals `expected_version`.
    /// Returns the new version, or `None` when the stored version moved on.
    async fn compare_and_bump(
        &self,
        project_id: &str,
        expected_version: i64,
        schema: &SchemaDesign,
        schema_hash: &str,
    ) -> Result<Option<i64>>;

    /// Rewrite the stored design without changing the version.
    async fn update_design(&self, project_id: &str, schema: &SchemaDesign, schema_hash: &str) -> Result<()>;

    async fn set_project_status(&self, project_id: &str, status: ProjectStatus) -> Result<()>;

    /// Delete a project and its change log.
    async fn delete_project(&self, project_id: &str) -> Result<()>;

    // ─── Change Log ─────────────────────────────────────────────────────────

    /// Append one entry. Entries are never updated.
    async fn append_change(&self, change: &ChangeRecord) -> Result<()>;

    /// Every entry of a project, in insertion order.
    async fn list_changes(&self, project_id: &str) -> Result<Vec<ChangeRecord>>;

    /// Applied entries that produced a version above `after_version`,
    /// ordered by version.
    async fn applied_changes_since(&self, project_id: &str, after_version: i64) -> Result<Vec<ChangeRecord>>;
}
