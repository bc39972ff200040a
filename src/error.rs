use thiserror::Error;

use crate::cluster::ExecError;

/// Errors surfaced by the synchronization engine.
///
/// Already-exists conditions are normally absorbed before they reach a
/// caller; `AlreadyExists` only escapes from the low-level helpers that
/// report it explicitly.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("version conflict on project {project_id}: expected {expected}, found {actual} (another change was applied concurrently)")]
    Conflict {
        project_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("unknown project '{0}'")]
    UnknownProject(String),

    #[error("unknown organization '{0}'")]
    UnknownOrganization(String),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("invalid change: {0}")]
    InvalidChange(String),

    #[error("DDL execution failed: {0}")]
    DdlExecution(#[source] ExecError),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("could not provision namespace '{namespace}': {source}")]
    Provision {
        namespace: String,
        #[source]
        source: ExecError,
    },

    #[error("statement timed out after {0}s")]
    Timeout(u64),

    #[error("master store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    /// Only optimistic-concurrency conflicts may be retried by re-reading.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }

    /// Map a remote execution failure, promoting privilege problems to
    /// configuration errors.
    pub fn from_exec(err: ExecError) -> Self {
        if err.is_permission_denied() {
            SyncError::Configuration(format!("cluster connection lacks DDL privilege: {}", err))
        } else if err.is_already_exists() {
            SyncError::AlreadyExists(err.message)
        } else {
            SyncError::DdlExecution(err)
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
