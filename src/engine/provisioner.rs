use dashmap::DashSet;
use tracing::{debug, info};

use crate::cluster::SqlExecutor;
use crate::ddl::DdlGenerator;
use crate::error::{SyncError, SyncResult};

/// Makes sure a tenant namespace exists, with its accessor function and
/// metadata table, before any table operation runs in it.
#[derive(Default)]
pub struct NamespaceProvisioner {
    ready: DashSet<(String, String)>,
}

impl NamespaceProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Privilege failures are configuration errors and are
    /// never retried.
    pub async fn ensure_namespace(&self, executor: &dyn SqlExecutor, ddl: &DdlGenerator) -> SyncResult<()> {
        let namespace = ddl.namespace().to_string();
        let key = (executor.endpoint().to_string(), namespace.clone());
        if self.ready.contains(&key) {
            debug!(namespace = %namespace, "Namespace already provisioned");
            return Ok(());
        }

        for statement in ddl.provision() {
            let sql = statement.to_string();
            debug!(namespace = %namespace, sql = %sql, "Provisioning");
            match executor.execute(&sql).await {
                Ok(_) => {}
                Err(e) if e.is_permission_denied() => {
                    return Err(SyncError::Configuration(format!(
                        "cluster connection cannot create namespace '{}': {}",
                        namespace, e
                    )));
                }
                Err(e) if e.is_already_exists() => {
                    debug!(namespace = %namespace, kind = statement.kind(), "Already present");
                }
                Err(e) => {
                    return Err(SyncError::Provision {
                        namespace,
                        source: e,
                    });
                }
            }
        }

        info!(namespace = %namespace, endpoint = executor.endpoint(), "Namespace provisioned");
        self.ready.insert(key);
        Ok(())
    }

    /// Forget a namespace so the next call provisions it again.
    pub fn invalidate(&self, endpoint: &str, namespace: &str) {
        self.ready.remove(&(endpoint.to_string(), namespace.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ExecError, MemoryCluster};

    #[tokio::test]
    async fn test_provisioning_is_idempotent_and_memoized() {
        let cluster = MemoryCluster::new("primary");
        let ddl = DdlGenerator::new("org_acme").unwrap();
        let provisioner = NamespaceProvisioner::new();

        provisioner.ensure_namespace(&cluster, &ddl).await.unwrap();
        provisioner.ensure_namespace(&cluster, &ddl).await.unwrap();

        assert!(cluster.has_namespace("org_acme"));
        assert_eq!(cluster.table_names("org_acme"), vec!["schema_sync_metadata"]);
        assert_eq!(cluster.executed().len(), 3);

        // A fresh provisioner re-runs the idempotent statements without error.
        NamespaceProvisioner::new().ensure_namespace(&cluster, &ddl).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_privilege_is_configuration_error() {
        let cluster = MemoryCluster::new("primary");
        cluster.deny_ddl(true);
        let ddl = DdlGenerator::new("org_acme").unwrap();
        let err = NamespaceProvisioner::new()
            .ensure_namespace(&cluster, &ddl)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_other_failures_are_provision_errors() {
        let cluster = MemoryCluster::new("primary");
        cluster.fail_on("FUNCTION", ExecError::new(Some("XX000"), "internal error"));
        let ddl = DdlGenerator::new("org_acme").unwrap();
        let provisioner = NamespaceProvisioner::new();
        let err = provisioner.ensure_namespace(&cluster, &ddl).await.unwrap_err();
        assert!(matches!(err, SyncError::Provision { .. }));

        // Not memoized after a failure.
        cluster.clear_failures();
        provisioner.ensure_namespace(&cluster, &ddl).await.unwrap();
    }
}
