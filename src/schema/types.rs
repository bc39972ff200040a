use regex::Regex;
use std::sync::OnceLock;

use crate::error::{SyncError, SyncResult};

/// Canonical spelling of every "generate a UUID" default.
pub const CANONICAL_UUID_DEFAULT: &str = "gen_random_uuid()";
/// Canonical spelling of every "current timestamp" default.
pub const CANONICAL_NOW_DEFAULT: &str = "now()";

const UUID_SPELLINGS: &[&str] = &[
    "gen_random_uuid()",
    "gen_random_uuid",
    "uuid_generate_v4()",
    "uuid_generate_v4",
    "uuid()",
    "uuid",
    "auto_uuid",
    "random_uuid()",
];

const NOW_SPELLINGS: &[&str] = &[
    "now()",
    "now",
    "current_timestamp",
    "current_timestamp()",
    "localtimestamp",
    "transaction_timestamp()",
    "timezone('utc'::text, now())",
    "timezone('utc', now())",
];

fn type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Z][A-Z0-9_ ]*(\(\s*\d+\s*(,\s*\d+\s*)?\))?(\[\])?$")
            .expect("static type pattern")
    })
}

/// Normalize a user-facing type name into the physical type string.
pub fn normalize_type(raw: &str) -> SyncResult<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Err(SyncError::InvalidChange("column type is empty".to_string()));
    }

    let lower = collapsed.to_lowercase();
    let aliased = match lower.as_str() {
        "int" | "int4" | "integer" => "INTEGER".to_string(),
        "int2" | "smallint" => "SMALLINT".to_string(),
        "int8" | "bigint" => "BIGINT".to_string(),
        "bool" | "boolean" => "BOOLEAN".to_string(),
        "string" | "text" => "TEXT".to_string(),
        "float" | "float8" | "double" | "double precision" => "DOUBLE PRECISION".to_string(),
        "float4" | "real" => "REAL".to_string(),
        "timestamptz" | "timestamp with time zone" => "TIMESTAMPTZ".to_string(),
        "timestamp" | "datetime" | "timestamp without time zone" => "TIMESTAMP".to_string(),
        _ => collapsed.to_uppercase(),
    };

    if !type_pattern().is_match(&aliased) {
        return Err(SyncError::InvalidChange(format!(
            "unsupported column type '{}'",
            raw
        )));
    }
    Ok(aliased)
}

/// Normalize for hashing: never fails, falls back to the trimmed upper-case
/// spelling.
pub fn normalize_type_lenient(raw: &str) -> String {
    normalize_type(raw).unwrap_or_else(|_| raw.trim().to_uppercase())
}

/// Physical type for a column, applying the serial rewrite for
/// auto-increment integer columns.
pub fn physical_type(raw: &str, auto_increment: bool) -> SyncResult<String> {
    let normalized = normalize_type(raw)?;
    if !auto_increment {
        return Ok(normalized);
    }
    Ok(match normalized.as_str() {
        "INTEGER" => "SERIAL".to_string(),
        "BIGINT" => "BIGSERIAL".to_string(),
        "SMALLINT" => "SMALLSERIAL".to_string(),
        _ => normalized,
    })
}

/// Collapse equivalent default spellings into one canonical token.
/// Blank defaults count as "no default".
pub fn canonical_default(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    if value.is_empty() {
        return None;
    }
    let lower = value.to_lowercase();
    if UUID_SPELLINGS.contains(&lower.as_str()) {
        return Some(CANONICAL_UUID_DEFAULT.to_string());
    }
    if NOW_SPELLINGS.contains(&lower.as_str()) {
        return Some(CANONICAL_NOW_DEFAULT.to_string());
    }
    Some(value.to_string())
}

/// Render a canonical default as a SQL expression. Canonical function
/// tokens, numbers, booleans and NULL pass through; everything else becomes
/// a quoted string literal.
pub fn default_expression(canonical: &str) -> String {
    if canonical == CANONICAL_UUID_DEFAULT || canonical == CANONICAL_NOW_DEFAULT {
        return canonical.to_string();
    }
    let lower = canonical.to_lowercase();
    if matches!(lower.as_str(), "true" | "false" | "null") {
        return lower.to_uppercase();
    }
    if canonical.parse::<f64>().is_ok() && !canonical.contains(|c: char| c.is_alphabetic()) {
        return canonical.to_string();
    }
    let unquoted = canonical
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(canonical);
    format!("'{}'", unquoted.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_type_aliases() {
        assert_eq!(normalize_type("int").unwrap(), "INTEGER");
        assert_eq!(normalize_type(" Integer ").unwrap(), "INTEGER");
        assert_eq!(normalize_type("string").unwrap(), "TEXT");
        assert_eq!(normalize_type("uuid").unwrap(), "UUID");
        assert_eq!(normalize_type("varchar(255)").unwrap(), "VARCHAR(255)");
        assert_eq!(normalize_type("numeric(10, 2)").unwrap(), "NUMERIC(10, 2)");
        assert_eq!(normalize_type("double   precision").unwrap(), "DOUBLE PRECISION");
        assert_eq!(normalize_type("text[]").unwrap(), "TEXT[]");
    }

    #[test]
    fn test_normalize_type_rejects_injection() {
        assert!(normalize_type("text; DROP TABLE x").is_err());
        assert!(normalize_type("").is_err());
        assert!(normalize_type("int) --").is_err());
    }

    #[test]
    fn test_physical_type_serial_rewrite() {
        assert_eq!(physical_type("integer", true).unwrap(), "SERIAL");
        assert_eq!(physical_type("bigint", true).unwrap(), "BIGSERIAL");
        assert_eq!(physical_type("uuid", true).unwrap(), "UUID");
        assert_eq!(physical_type("integer", false).unwrap(), "INTEGER");
    }

    #[test]
    fn test_canonical_defaults() {
        for spelling in ["uuid_generate_v4()", "GEN_RANDOM_UUID()", "uuid()", "auto_uuid"] {
            assert_eq!(canonical_default(Some(spelling)).unwrap(), CANONICAL_UUID_DEFAULT);
        }
        for spelling in ["NOW()", "CURRENT_TIMESTAMP", "now", "timezone('utc'::text, now())"] {
            assert_eq!(canonical_default(Some(spelling)).unwrap(), CANONICAL_NOW_DEFAULT);
        }
        assert_eq!(canonical_default(Some("  ")), None);
        assert_eq!(canonical_default(None), None);
        assert_eq!(canonical_default(Some("active")).unwrap(), "active");
    }

    #[test]
    fn test_default_expression_quotes_literals() {
        assert_eq!(default_expression("now()"), "now()");
        assert_eq!(default_expression("42"), "42");
        assert_eq!(default_expression("-1.5"), "-1.5");
        assert_eq!(default_expression("true"), "TRUE");
        assert_eq!(default_expression("active"), "'active'");
        assert_eq!(default_expression("'pending'"), "'pending'");
        assert_eq!(default_expression("it's"), "'it''s'");
        assert_eq!(default_expression("inf"), "'inf'");
    }
}
