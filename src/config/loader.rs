use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::types::SyncConfig;
use super::validator;

pub const DEFAULT_CONFIG_FILE: &str = "schemasync.yaml";

/// Load configuration from a YAML file.
///
/// - If the file exists, parse and validate it.
/// - If `path` is the default `schemasync.yaml` and doesn't exist, use defaults.
/// - Any other missing path is an error.
pub fn load_config(path: &str) -> Result<SyncConfig> {
    let p = Path::new(path);

    if p.is_file() {
        let content =
            fs::read_to_string(p).with_context(|| format!("Failed to read config file: {}", path))?;
        return parse_config(&content).with_context(|| format!("Invalid config file: {}", path));
    }

    if path == DEFAULT_CONFIG_FILE && !p.exists() {
        tracing::debug!("No config file found, using defaults");
        let config = SyncConfig::default();
        validator::validate(&config)?;
        return Ok(config);
    }

    anyhow::bail!(
        "Config not found: '{}'. Create {} or specify a path with -c",
        path,
        DEFAULT_CONFIG_FILE
    )
}

/// Parse and validate YAML content.
pub fn parse_config(content: &str) -> Result<SyncConfig> {
    let config: SyncConfig = if content.trim().is_empty() {
        SyncConfig::default()
    } else {
        serde_yaml::from_str(content).context("Failed to parse YAML configuration")?
    };
    validator::validate(&config)?;
    Ok(config)
}
