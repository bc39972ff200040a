use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::schema::{compute_hash, SchemaDesign};
use crate::state::MasterStore;

/// Monotonic project versions with optimistic concurrency.
#[derive(Clone)]
pub struct VersionTracker {
    store: Arc<dyn MasterStore>,
}

impl VersionTracker {
    pub fn new(store: Arc<dyn MasterStore>) -> Self {
        Self { store }
    }

    /// Store `design` as the next version of the project. Rejected with
    /// `Conflict` if the stored version is no longer `expected_version`;
    /// the stored record is then left untouched.
    pub async fn bump_version(
        &self,
        project_id: &str,
        expected_version: i64,
        design: &SchemaDesign,
    ) -> SyncResult<(i64, String)> {
        let hash = compute_hash(design);
        match self
            .store
            .compare_and_bump(project_id, expected_version, design, &hash)
            .await?
        {
            Some(version) => {
                info!(project = project_id, version, "Project version advanced");
                Ok((version, hash))
            }
            None => {
                let actual = self
                    .store
                    .get_project(project_id)
                    .await?
                    .map(|p| p.version)
                    .ok_or_else(|| SyncError::UnknownProject(project_id.to_string()))?;
                warn!(
                    project = project_id,
                    expected = expected_version,
                    actual,
                    "Version conflict"
                );
                Err(SyncError::Conflict {
                    project_id: project_id.to_string(),
                    expected: expected_version,
                    actual,
                })
            }
        }
    }

    /// Advance the version without changing the design.
    pub async fn bump_current(&self, project_id: &str, expected_version: i64) -> SyncResult<i64> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| SyncError::UnknownProject(project_id.to_string()))?;
        let (version, _) = self.bump_version(project_id, expected_version, &project.schema).await?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::Project;
    use crate::state::SqliteMaster;

    async fn tracker() -> VersionTracker {
        let store = Arc::new(SqliteMaster::open_memory().unwrap());
        store.initialize().await.unwrap();
        store.upsert_organization("acme", "Acme").await.unwrap();
        store
            .create_project(&Project::new("p1", "acme", "Shop", SchemaDesign::default()))
            .await
            .unwrap();
        VersionTracker::new(store)
    }

    #[tokio::test]
    async fn test_bump_then_stale_bump_conflicts() {
        let tracker = tracker().await;
        let (version, hash) = tracker.bump_version("p1", 1, &SchemaDesign::default()).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(hash, compute_hash(&SchemaDesign::default()));

        match tracker.bump_version("p1", 1, &SchemaDesign::default()).await {
            Err(SyncError::Conflict { expected, actual, .. }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let tracker = tracker().await;
        let err = tracker.bump_current("missing", 1).await.unwrap_err();
        assert!(matches!(err, SyncError::UnknownProject(_)));
    }
}
