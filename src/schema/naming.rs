use sha2::{Digest, Sha256};

use super::model::Table;
use crate::ddl::MAX_IDENT_LEN;

pub const DEFAULT_TABLE_PREFIX: &str = "t_";
pub const DEFAULT_NAMESPACE_PREFIX: &str = "org_";

/// Derives physical identifiers from stable logical ids.
///
/// Both functions are pure: they never consult a clock, a random source or
/// the display name, so the same id maps to the same identifier in every
/// process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingResolver {
    table_prefix: String,
    namespace_prefix: String,
}

impl Default for NamingResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_PREFIX, DEFAULT_NAMESPACE_PREFIX)
    }
}

impl NamingResolver {
    pub fn new(table_prefix: &str, namespace_prefix: &str) -> Self {
        Self {
            table_prefix: table_prefix.to_string(),
            namespace_prefix: namespace_prefix.to_string(),
        }
    }

    /// Physical table name for a table id: prefix + escaped id.
    ///
    /// Distinct ids always give distinct names. Ids whose escaped form does
    /// not fit in an identifier keep a readable head and a digest of the raw
    /// id behind a `_9` marker, which the escaping never produces.
    pub fn internal_name(&self, table_id: &str) -> String {
        let budget = MAX_IDENT_LEN.saturating_sub(self.table_prefix.len());
        let escaped = escape_id(table_id);
        if escaped.len() <= budget {
            return format!("{}{}", self.table_prefix, escaped);
        }

        let head_budget = budget.saturating_sub(OVERFLOW_MARKER.len() + OVERFLOW_DIGEST_LEN);
        let mut head = String::new();
        for ch in table_id.chars() {
            let code = escape_char(ch);
            if head.len() + code.len() > head_budget {
                break;
            }
            head.push_str(&code);
        }
        let digest = hex::encode(Sha256::digest(table_id.as_bytes()));
        format!(
            "{}{}{}{}",
            self.table_prefix,
            head,
            OVERFLOW_MARKER,
            &digest[..OVERFLOW_DIGEST_LEN]
        )
    }

    /// Namespace (schema) name for an organization: prefix + id with
    /// separator characters stripped.
    pub fn namespace_name(&self, organization_id: &str) -> String {
        let stripped: String = organization_id
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '.' | ' '))
            .flat_map(|c| c.to_lowercase())
            .collect();
        format!("{}{}", self.namespace_prefix, stripped)
    }

    /// Resolve the physical name of a table entity.
    pub fn resolve(&self, table: &Table) -> String {
        table.physical_name(self)
    }
}

const OVERFLOW_MARKER: &str = "_9";
const OVERFLOW_DIGEST_LEN: usize = 16;

/// Escape an id into `[a-z0-9_]` without losing information, so unquoted
/// identifiers (which fold to lower case) stay distinct:
///
/// - `a`-`z`, `0`-`9`: unchanged
/// - `_`: `__`
/// - `A`-`Z`: `_` + the lower-case letter
/// - `-`: `_0`
/// - anything else: `_1` + the code point as six hex digits
///
/// Every code is either one plain character or starts with `_`, and the
/// character after `_` says how long the code is, so decoding is unambiguous.
fn escape_id(id: &str) -> String {
    id.chars().map(escape_char).collect()
}

fn escape_char(ch: char) -> String {
    match ch {
        'a'..='z' | '0'..='9' => ch.to_string(),
        '_' => "__".to_string(),
        'A'..='Z' => format!("_{}", ch.to_ascii_lowercase()),
        '-' => "_0".to_string(),
        other => format!("_1{:06x}", other as u32),
    }
}
