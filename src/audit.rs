use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::state::models::ChangeRecord;
use crate::state::MasterStore;

/// Append-only record of attempted schema changes.
///
/// Recording never fails the caller: a write failure is logged and dropped.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &ChangeRecord);
}

/// Writes entries to the Master change log.
pub struct StoreAuditLog {
    store: Arc<dyn MasterStore>,
}

impl StoreAuditLog {
    pub fn new(store: Arc<dyn MasterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditLog for StoreAuditLog {
    async fn record(&self, entry: &ChangeRecord) {
        debug!(
            project = %entry.project_id,
            change_type = %entry.change_type,
            status = entry.status.as_str(),
            "Recording schema change"
        );
        if let Err(e) = self.store.append_change(entry).await {
            warn!(
                project = %entry.project_id,
                change_type = %entry.change_type,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }
}

/// Keeps entries in memory.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<ChangeRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ChangeRecord> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, entry: &ChangeRecord) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry.clone()),
            Err(_) => warn!(project = %entry.project_id, "Audit buffer poisoned, entry dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SqliteMaster;

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        // Uninitialized store: the schema_changes table does not exist.
        let store = Arc::new(SqliteMaster::open_memory().unwrap());
        let log = StoreAuditLog::new(store);
        let entry = ChangeRecord::new("p1", "acme", "add_table", serde_json::json!({}));
        log.record(&entry).await;
    }

    #[tokio::test]
    async fn test_store_log_appends() {
        let store = Arc::new(SqliteMaster::open_memory().unwrap());
        store.initialize().await.unwrap();
        let log = StoreAuditLog::new(store.clone());
        log.record(&ChangeRecord::new("p1", "acme", "add_table", serde_json::json!({})))
            .await;
        log.record(&ChangeRecord::new("p1", "acme", "drop_table", serde_json::json!({})))
            .await;

        let changes = store.list_changes("p1").await.unwrap();
        let kinds: Vec<&str> = changes.iter().map(|c| c.change_type.as_str()).collect();
        assert_eq!(kinds, vec!["add_table", "drop_table"]);
    }

    #[tokio::test]
    async fn test_memory_log_keeps_order() {
        let log = MemoryAuditLog::new();
        log.record(&ChangeRecord::new("p1", "acme", "a", serde_json::json!({}))).await;
        log.record(&ChangeRecord::new("p1", "acme", "b", serde_json::json!({}))).await;
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries()[1].change_type, "b");
    }
}
