pub mod memory;
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod retry;

use async_trait::async_trait;
use std::fmt;

pub use memory::MemoryCluster;
pub use pool::{ClusterPool, Connector, UrlConnector};

/// SQLSTATE codes the engine reacts to.
pub mod sqlstate {
    pub const DUPLICATE_SCHEMA: &str = "42P06";
    pub const DUPLICATE_TABLE: &str = "42P07";
    pub const DUPLICATE_COLUMN: &str = "42701";
    pub const DUPLICATE_OBJECT: &str = "42710";
    pub const INSUFFICIENT_PRIVILEGE: &str = "42501";
    pub const UNDEFINED_TABLE: &str = "42P01";
    pub const UNDEFINED_COLUMN: &str = "42703";
    pub const UNDEFINED_OBJECT: &str = "42704";
    pub const INVALID_SCHEMA_NAME: &str = "3F000";
    pub const INVALID_FOREIGN_KEY: &str = "42830";
    pub const SYNTAX_ERROR: &str = "42601";
    pub const CONNECTION_FAILURE: &str = "08006";
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
}

/// Failure reported by a cluster for one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecError {
    pub code: Option<String>,
    pub message: String,
}

impl ExecError {
    pub fn new(code: Option<&str>, message: &str) -> Self {
        Self {
            code: code.map(|c| c.to_string()),
            message: message.to_string(),
        }
    }

    fn has_code(&self, codes: &[&str]) -> bool {
        self.code.as_deref().map(|c| codes.contains(&c)).unwrap_or(false)
    }

    pub fn is_already_exists(&self) -> bool {
        self.has_code(&[
            sqlstate::DUPLICATE_SCHEMA,
            sqlstate::DUPLICATE_TABLE,
            sqlstate::DUPLICATE_COLUMN,
            sqlstate::DUPLICATE_OBJECT,
        ]) || (self.code.is_none() && self.message.contains("already exists"))
    }

    pub fn is_permission_denied(&self) -> bool {
        self.has_code(&[sqlstate::INSUFFICIENT_PRIVILEGE])
            || (self.code.is_none() && self.message.contains("permission denied"))
    }

    pub fn is_missing_relation(&self) -> bool {
        self.has_code(&[sqlstate::UNDEFINED_TABLE, sqlstate::INVALID_SCHEMA_NAME])
    }

    /// Connection-level failures worth retrying when establishing a handle.
    pub fn is_transient(&self) -> bool {
        match self.code.as_deref() {
            Some(code) => code.starts_with("08"),
            None => !self.is_permission_denied(),
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ExecError {}

/// The only capability required from a physical cluster: run one SQL
/// statement and return its rows as JSON objects.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<serde_json::Value>, ExecError>;

    /// Endpoint key this handle was acquired for.
    fn endpoint(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_classification() {
        assert!(ExecError::new(Some("42P07"), "exists").is_already_exists());
        assert!(ExecError::new(Some("42710"), "policy exists").is_already_exists());
        assert!(ExecError::new(None, "policy \"x\" already exists").is_already_exists());
        assert!(!ExecError::new(Some("42601"), "syntax error").is_already_exists());

        assert!(ExecError::new(Some("42501"), "denied").is_permission_denied());
        assert!(ExecError::new(Some("08006"), "connection reset").is_transient());
        assert!(!ExecError::new(Some("42501"), "denied").is_transient());
    }

    #[test]
    fn test_exec_error_display() {
        let err = ExecError::new(Some("42P01"), "relation does not exist");
        assert_eq!(err.to_string(), "[42P01] relation does not exist");
    }
}
