pub mod applier;
pub mod change;
pub mod provisioner;
pub mod reconcile;
pub mod tracker;

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::audit::AuditLog;
use crate::cluster::{ClusterPool, SqlExecutor};
use crate::ddl::{DdlGenerator, Statement};
use crate::error::{SyncError, SyncResult};
use crate::schema::NamingResolver;
use crate::state::models::{DeploymentConfig, DeploymentStrategy, Project};
use crate::state::MasterStore;

pub use applier::{
    ApplyResult, ChangeApplier, DeleteResult, ForeignKeyOutcome, PolicyFailure, SchemaApplyResult, TableOutcome,
};
pub use change::{ChangeRequest, ChangeSpec, ForeignKeySpec, SchemaChange};
pub use provisioner::NamespaceProvisioner;
pub use reconcile::{
    classify, ConstraintRepair, MissingConstraint, ReconcileReport, Reconciler, SlaveRecord, SyncState,
    SyncVerification,
};
pub use tracker::VersionTracker;

/// Runtime knobs of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub strategy: DeploymentStrategy,
    pub default_endpoint: String,
    pub statement_timeout: Duration,
    pub parallelism: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strategy: DeploymentStrategy::Shared,
            default_endpoint: "primary".to_string(),
            statement_timeout: Duration::from_secs(30),
            parallelism: 4,
        }
    }
}

/// Everything an engine operation needs. Shared by the applier and the
/// reconciler; holds no per-tenant state besides the provisioning memo.
pub struct SyncContext {
    pub store: Arc<dyn MasterStore>,
    pub pool: Arc<ClusterPool>,
    pub audit: Arc<dyn AuditLog>,
    pub naming: NamingResolver,
    pub settings: EngineSettings,
    pub provisioner: NamespaceProvisioner,
    pub tracker: VersionTracker,
}

/// A resolved tenant location with a live cluster handle.
pub struct Target {
    pub endpoint: String,
    pub ddl: DdlGenerator,
    pub executor: Arc<dyn SqlExecutor>,
}

impl Target {
    pub fn namespace(&self) -> &str {
        self.ddl.namespace().as_str()
    }
}

impl SyncContext {
    pub fn new(
        store: Arc<dyn MasterStore>,
        pool: Arc<ClusterPool>,
        audit: Arc<dyn AuditLog>,
        naming: NamingResolver,
        settings: EngineSettings,
    ) -> Self {
        Self {
            tracker: VersionTracker::new(Arc::clone(&store)),
            store,
            pool,
            audit,
            naming,
            settings,
            provisioner: NamespaceProvisioner::new(),
        }
    }

    /// Load a project and check it belongs to the organization.
    pub async fn load_project(&self, organization_id: &str, project_id: &str) -> SyncResult<Project> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| SyncError::UnknownProject(project_id.to_string()))?;
        if project.organization_id != organization_id {
            return Err(SyncError::UnknownProject(format!(
                "{} (not owned by organization '{}')",
                project_id, organization_id
            )));
        }
        Ok(project)
    }

    /// Resolve where an organization's tables live. Under the shared
    /// strategy a missing deployment config is created on first use.
    pub async fn deployment(&self, organization_id: &str) -> SyncResult<DeploymentConfig> {
        if self.store.get_organization(organization_id).await?.is_none() {
            return Err(SyncError::UnknownOrganization(organization_id.to_string()));
        }
        if let Some(config) = self.store.get_deployment_config(organization_id).await? {
            return Ok(config);
        }

        match self.settings.strategy {
            DeploymentStrategy::Shared => {
                let config = DeploymentConfig {
                    organization_id: organization_id.to_string(),
                    strategy: DeploymentStrategy::Shared,
                    endpoint: self.settings.default_endpoint.clone(),
                    namespace: self.naming.namespace_name(organization_id),
                };
                self.store.upsert_deployment_config(&config).await?;
                info!(
                    organization = organization_id,
                    endpoint = %config.endpoint,
                    namespace = %config.namespace,
                    "Created shared deployment config"
                );
                Ok(config)
            }
            DeploymentStrategy::Dedicated => Err(SyncError::Configuration(format!(
                "organization '{}' has no registered dedicated deployment",
                organization_id
            ))),
        }
    }

    /// Deployment config plus a cluster handle for it.
    pub async fn target(&self, organization_id: &str) -> SyncResult<Target> {
        let config = self.deployment(organization_id).await?;
        let executor = self.pool.acquire(&config.endpoint).await?;
        Ok(Target {
            ddl: DdlGenerator::new(&config.namespace)?,
            endpoint: config.endpoint,
            executor,
        })
    }

    /// Run one statement under the configured timeout.
    pub async fn execute(&self, target: &Target, statement: &Statement) -> SyncResult<Vec<Value>> {
        let sql = statement.to_string();
        self.execute_sql(target, &sql).await
    }

    pub async fn execute_sql(&self, target: &Target, sql: &str) -> SyncResult<Vec<Value>> {
        debug!(namespace = target.namespace(), sql, "Executing");
        let timeout = self.settings.statement_timeout;
        match tokio::time::timeout(timeout, target.executor.execute(sql)).await {
            Ok(result) => result.map_err(SyncError::from_exec),
            Err(_) => Err(SyncError::Timeout(timeout.as_secs())),
        }
    }
}
