use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::cluster::ClusterPool;
use crate::engine::EngineSettings;
use crate::schema::naming::{DEFAULT_NAMESPACE_PREFIX, DEFAULT_TABLE_PREFIX};
use crate::schema::NamingResolver;
use crate::state::models::DeploymentStrategy;

// ─── Top-Level Config ───────────────────────────────────────────────────────

/// Root of `schemasync.yaml`. Every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub deployment: DeploymentConfigSection,
    /// Endpoint key → connection URL (`postgres://…` or `memory://`).
    #[serde(default = "default_clusters")]
    pub clusters: BTreeMap<String, String>,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            master: MasterConfig::default(),
            naming: NamingConfig::default(),
            deployment: DeploymentConfigSection::default(),
            clusters: default_clusters(),
            execution: ExecutionConfig::default(),
        }
    }
}

fn default_clusters() -> BTreeMap<String, String> {
    BTreeMap::from([(default_endpoint(), "memory://".to_string())])
}

impl SyncConfig {
    /// Build the cluster pool from the declared endpoints.
    pub fn cluster_pool(&self) -> ClusterPool {
        let endpoints: HashMap<String, String> = self
            .clusters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ClusterPool::new(endpoints).with_retry_policy(
            self.execution.connect_retries,
            self.execution.retry_base_delay_ms,
        )
    }

    pub fn naming_resolver(&self) -> NamingResolver {
        NamingResolver::new(&self.naming.table_prefix, &self.naming.namespace_prefix)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            strategy: self.deployment.strategy,
            default_endpoint: self.deployment.default_endpoint.clone(),
            statement_timeout: Duration::from_secs(self.execution.statement_timeout_secs),
            parallelism: self.execution.parallelism,
        }
    }
}

// ─── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterConfig {
    #[serde(default = "default_master_path")]
    pub path: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            path: default_master_path(),
        }
    }
}

fn default_master_path() -> String {
    ".schemasync/master.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamingConfig {
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            table_prefix: default_table_prefix(),
            namespace_prefix: default_namespace_prefix(),
        }
    }
}

fn default_table_prefix() -> String {
    DEFAULT_TABLE_PREFIX.to_string()
}

fn default_namespace_prefix() -> String {
    DEFAULT_NAMESPACE_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentConfigSection {
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    #[serde(default = "default_endpoint")]
    pub default_endpoint: String,
}

impl Default for DeploymentConfigSection {
    fn default() -> Self {
        Self {
            strategy: DeploymentStrategy::Shared,
            default_endpoint: default_endpoint(),
        }
    }
}

fn default_endpoint() -> String {
    "primary".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            statement_timeout_secs: default_statement_timeout(),
            parallelism: default_parallelism(),
            connect_retries: default_connect_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }
}

fn default_statement_timeout() -> u64 {
    30
}

fn default_parallelism() -> usize {
    4
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    200
}
