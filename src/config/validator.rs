use regex::Regex;

use super::types::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Validate the entire configuration for correctness.
pub fn validate(config: &SyncConfig) -> SyncResult<()> {
    validate_endpoints(config)?;
    validate_prefixes(config)?;
    validate_execution(config)?;
    Ok(())
}

/// The default endpoint must be declared, and every URL must use a known scheme.
fn validate_endpoints(config: &SyncConfig) -> SyncResult<()> {
    let default = &config.deployment.default_endpoint;
    if !config.clusters.contains_key(default) {
        return Err(SyncError::Configuration(format!(
            "default endpoint '{}' is not declared under 'clusters'",
            default
        )));
    }
    for (name, url) in &config.clusters {
        let known = ["memory://", "postgres://", "postgresql://"]
            .iter()
            .any(|scheme| url.starts_with(scheme));
        if !known {
            return Err(SyncError::Configuration(format!(
                "cluster '{}' has an unsupported URL scheme",
                name
            )));
        }
    }
    Ok(())
}

/// Prefixes must start an identifier and leave room for the id.
fn validate_prefixes(config: &SyncConfig) -> SyncResult<()> {
    let prefix = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,15}$")
        .map_err(|e| SyncError::Configuration(e.to_string()))?;
    for (field, value) in [
        ("naming.table_prefix", &config.naming.table_prefix),
        ("naming.namespace_prefix", &config.naming.namespace_prefix),
    ] {
        if !prefix.is_match(value) {
            return Err(SyncError::Configuration(format!(
                "{} '{}' is not a valid identifier prefix",
                field, value
            )));
        }
    }
    Ok(())
}

fn validate_execution(config: &SyncConfig) -> SyncResult<()> {
    if config.execution.parallelism == 0 {
        return Err(SyncError::Configuration(
            "execution.parallelism must be at least 1".to_string(),
        ));
    }
    if config.execution.statement_timeout_secs == 0 {
        return Err(SyncError::Configuration(
            "execution.statement_timeout_secs must be at least 1".to_string(),
        ));
    }
    Ok(())
}
