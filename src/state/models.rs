use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::schema::SchemaDesign;

// ─── Organization ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

// ─── Deployment ─────────────────────────────────────────────────────────────

/// How tenants are spread over clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStrategy {
    /// All tenants live on the default endpoint, one namespace each.
    #[default]
    Shared,
    /// Each tenant has its own registered endpoint.
    Dedicated,
}

impl DeploymentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStrategy::Shared => "shared",
            DeploymentStrategy::Dedicated => "dedicated",
        }
    }
}

impl FromStr for DeploymentStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(DeploymentStrategy::Shared),
            "dedicated" => Ok(DeploymentStrategy::Dedicated),
            other => Err(format!("unknown deployment strategy '{}'", other)),
        }
    }
}

/// Which cluster endpoint and namespace serve an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub organization_id: String,
    pub strategy: DeploymentStrategy,
    pub endpoint: String,
    pub namespace: String,
}

// ─── Project ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Applying,
    Applied,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Applying => "applying",
            ProjectStatus::Applied => "applied",
            ProjectStatus::Failed => "failed",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProjectStatus::Active),
            "applying" => Ok(ProjectStatus::Applying),
            "applied" => Ok(ProjectStatus::Applied),
            "failed" => Ok(ProjectStatus::Failed),
            other => Err(format!("unknown project status '{}'", other)),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A project's logical design as stored in the Master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub schema: SchemaDesign,
    pub version: i64,
    pub schema_hash: String,
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    /// A fresh project at version 1.
    pub fn new(id: &str, organization_id: &str, name: &str, schema: SchemaDesign) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: id.to_string(),
            organization_id: organization_id.to_string(),
            name: name.to_string(),
            schema_hash: crate::schema::compute_hash(&schema),
            schema,
            version: 1,
            status: ProjectStatus::Active,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

// ─── Schema Change Log ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Applied,
    Failed,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Applied => "applied",
            ChangeStatus::Failed => "failed",
        }
    }
}

impl FromStr for ChangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChangeStatus::Pending),
            "applied" => Ok(ChangeStatus::Applied),
            "failed" => Ok(ChangeStatus::Failed),
            other => Err(format!("unknown change status '{}'", other)),
        }
    }
}

/// One immutable entry of a project's schema change log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: String,
    pub project_id: String,
    pub organization_id: String,
    pub change_type: String,
    pub change_data: serde_json::Value,
    pub status: ChangeStatus,
    /// Statements exactly as sent to the cluster, in order.
    pub statements: Vec<String>,
    pub error_message: Option<String>,
    /// Project version produced by this change (applied entries only).
    pub version: Option<i64>,
    pub schema_hash: Option<String>,
    pub applied_at: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
}

impl ChangeRecord {
    pub fn new(project_id: &str, organization_id: &str, change_type: &str, change_data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            organization_id: organization_id.to_string(),
            change_type: change_type.to_string(),
            change_data,
            status: ChangeStatus::Pending,
            statements: Vec::new(),
            error_message: None,
            version: None,
            schema_hash: None,
            applied_at: None,
            created_by: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
