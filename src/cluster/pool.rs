use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::memory::MemoryCluster;
use super::retry::with_retry;
use super::{sqlstate, ExecError, SqlExecutor};
use crate::error::{SyncError, SyncResult};

/// Opens a handle to a cluster endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str, url: &str) -> Result<Arc<dyn SqlExecutor>, ExecError>;
}

/// Picks a driver from the URL scheme: `memory://` or `postgres://`.
#[derive(Debug, Default)]
pub struct UrlConnector;

#[async_trait]
impl Connector for UrlConnector {
    async fn connect(&self, endpoint: &str, url: &str) -> Result<Arc<dyn SqlExecutor>, ExecError> {
        if url.starts_with("memory://") {
            return Ok(Arc::new(MemoryCluster::new(endpoint)));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return connect_postgres(endpoint, url).await;
        }
        Err(ExecError::new(
            Some(sqlstate::FEATURE_NOT_SUPPORTED),
            &format!("unsupported cluster URL scheme for endpoint '{}'", endpoint),
        ))
    }
}

#[cfg(feature = "postgres")]
async fn connect_postgres(endpoint: &str, url: &str) -> Result<Arc<dyn SqlExecutor>, ExecError> {
    let executor = super::postgres::PgExecutor::connect(endpoint, url).await?;
    Ok(Arc::new(executor))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(endpoint: &str, _url: &str) -> Result<Arc<dyn SqlExecutor>, ExecError> {
    Err(ExecError::new(
        Some(sqlstate::FEATURE_NOT_SUPPORTED),
        &format!("endpoint '{}' needs the `postgres` feature", endpoint),
    ))
}

/// Cluster handles keyed by endpoint. Each operation acquires its own
/// handle; nothing tenant-specific is stored on a handle.
pub struct ClusterPool {
    endpoints: HashMap<String, String>,
    handles: DashMap<String, Arc<dyn SqlExecutor>>,
    connector: Arc<dyn Connector>,
    connect_retries: u32,
    retry_base_delay_ms: u64,
}

impl ClusterPool {
    /// `endpoints` maps endpoint keys to connection URLs.
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self::with_connector(endpoints, Arc::new(UrlConnector))
    }

    pub fn with_connector(endpoints: HashMap<String, String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            endpoints,
            handles: DashMap::new(),
            connector,
            connect_retries: 3,
            retry_base_delay_ms: 200,
        }
    }

    pub fn with_retry_policy(mut self, retries: u32, base_delay_ms: u64) -> Self {
        self.connect_retries = retries;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Register an already-open handle, e.g. a test double.
    pub fn register(&self, endpoint: &str, executor: Arc<dyn SqlExecutor>) {
        self.handles.insert(endpoint.to_string(), executor);
    }

    pub fn has_endpoint(&self, endpoint: &str) -> bool {
        self.endpoints.contains_key(endpoint) || self.handles.contains_key(endpoint)
    }

    /// Acquire a handle for an endpoint, connecting on first use.
    pub async fn acquire(&self, endpoint: &str) -> SyncResult<Arc<dyn SqlExecutor>> {
        if let Some(handle) = self.handles.get(endpoint) {
            debug!(endpoint, "Reusing cluster handle");
            return Ok(Arc::clone(handle.value()));
        }

        let url = self.endpoints.get(endpoint).ok_or_else(|| {
            SyncError::Configuration(format!("no cluster configured for endpoint '{}'", endpoint))
        })?;

        info!(endpoint, "Connecting to cluster");
        let connector = Arc::clone(&self.connector);
        let handle = with_retry(
            self.connect_retries,
            self.retry_base_delay_ms,
            "cluster_connect",
            |e: &ExecError| e.is_transient(),
            || {
                let connector = Arc::clone(&connector);
                async move { connector.connect(endpoint, url).await }
            },
        )
        .await
        .map_err(|e| {
            SyncError::Configuration(format!("cannot connect to endpoint '{}': {}", endpoint, e))
        })?;

        let entry = self
            .handles
            .entry(endpoint.to_string())
            .or_insert(handle);
        Ok(Arc::clone(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyConnector {
        attempts: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn connect(&self, endpoint: &str, _url: &str) -> Result<Arc<dyn SqlExecutor>, ExecError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ExecError::new(Some("08006"), "connection refused"));
            }
            Ok(Arc::new(MemoryCluster::new(endpoint)))
        }
    }

    fn endpoints() -> HashMap<String, String> {
        HashMap::from([("primary".to_string(), "memory://".to_string())])
    }

    #[tokio::test]
    async fn test_acquire_reuses_handle() {
        let pool = ClusterPool::new(endpoints());
        let a = pool.acquire("primary").await.unwrap();
        let b = pool.acquire("primary").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.endpoint(), "primary");
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_configuration_error() {
        let pool = ClusterPool::new(endpoints());
        let err = pool.acquire("missing").await.err().unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_transient_connect_failures_are_retried() {
        let connector = Arc::new(FlakyConnector {
            attempts: AtomicU32::new(0),
            fail_first: 2,
        });
        let pool = ClusterPool::with_connector(endpoints(), connector.clone()).with_retry_policy(3, 1);
        assert!(pool.acquire("primary").await.is_ok());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unsupported_scheme_not_retried() {
        let pool = ClusterPool::new(HashMap::from([(
            "odd".to_string(),
            "mysql://host/db".to_string(),
        )]))
        .with_retry_policy(3, 1);
        let err = pool.acquire("odd").await.err().unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
