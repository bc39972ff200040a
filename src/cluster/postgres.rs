use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::debug;

use super::{sqlstate, ExecError, SqlExecutor};

/// PostgreSQL cluster handle backed by a small sqlx pool.
pub struct PgExecutor {
    endpoint: String,
    pool: PgPool,
}

impl PgExecutor {
    pub async fn connect(endpoint: &str, url: &str) -> Result<Self, ExecError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;
        debug!(endpoint, "Connected to PostgreSQL cluster");
        Ok(Self {
            endpoint: endpoint.to_string(),
            pool,
        })
    }
}

fn returns_rows(sql: &str) -> bool {
    sql.trim_start().to_ascii_uppercase().starts_with("SELECT")
}

fn map_sqlx_error(err: sqlx::Error) -> ExecError {
    match &err {
        sqlx::Error::Database(db) => ExecError::new(db.code().as_deref(), db.message()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            ExecError::new(Some(sqlstate::CONNECTION_FAILURE), &err.to_string())
        }
        sqlx::Error::Tls(_) => ExecError::new(Some(sqlstate::CONNECTION_FAILURE), &err.to_string()),
        _ => ExecError::new(None, &err.to_string()),
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<Vec<Value>, ExecError> {
        if returns_rows(sql) {
            let wrapped = format!(
                "SELECT COALESCE(json_agg(q), '[]'::json)::text FROM ({}) q",
                sql.trim().trim_end_matches(';')
            );
            let text: String = sqlx::query_scalar(&wrapped)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            let rows: Vec<Value> = serde_json::from_str(&text)
                .map_err(|e| ExecError::new(None, &format!("invalid row payload: {}", e)))?;
            return Ok(rows);
        }

        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(vec![])
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_returning_detection() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  select project_id FROM x"));
        assert!(!returns_rows("CREATE SCHEMA IF NOT EXISTS org_a"));
        assert!(!returns_rows("INSERT INTO org_a.schema_sync_metadata VALUES (1)"));
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_transient());
    }
}
