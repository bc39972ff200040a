use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{SyncError, SyncResult};

/// Longest identifier the cluster keeps without truncation.
pub const MAX_IDENT_LEN: usize = 63;

/// Table inside each tenant namespace holding per-project sync state.
pub const METADATA_TABLE: &str = "schema_sync_metadata";

/// Namespace-scoped function returning the organization of the session.
pub const ORG_ACCESSOR_FN: &str = "current_organization_id";

/// Session setting read by the accessor function.
pub const ORG_SETTING: &str = "app.current_organization_id";

fn ident_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static ident pattern"))
}

// ─── Identifiers ────────────────────────────────────────────────────────────

/// A validated SQL identifier, safe to interpolate unquoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    pub fn new(raw: &str) -> SyncResult<Self> {
        if raw.len() > MAX_IDENT_LEN || !ident_pattern().is_match(raw) {
            return Err(SyncError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Build an identifier from already-validated parts joined by `_`.
    /// Over-long results keep a readable head plus a digest of the full
    /// name so distinct inputs stay distinct.
    pub fn derived(parts: &[&str]) -> SyncResult<Self> {
        let full = parts.join("_");
        if full.len() <= MAX_IDENT_LEN {
            return Self::new(&full);
        }
        let digest = hex::encode(Sha256::digest(full.as_bytes()));
        let head: String = full.chars().take(MAX_IDENT_LEN - 9).collect();
        Self::new(&format!("{}_{}", head, &digest[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `namespace.name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub namespace: Ident,
    pub name: Ident,
}

impl QualifiedName {
    pub fn new(namespace: &Ident, name: &str) -> SyncResult<Self> {
        Ok(Self {
            namespace: namespace.clone(),
            name: Ident::new(name)?,
        })
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Single-quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ─── Column Clauses ─────────────────────────────────────────────────────────

/// One column clause of a CREATE TABLE or ADD COLUMN.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: Ident,
    pub sql_type: String,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    /// Rendered SQL expression.
    pub default: Option<String>,
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.sql_type)?;
        if self.primary_key {
            write!(f, " PRIMARY KEY")?;
        } else if self.not_null {
            write!(f, " NOT NULL")?;
        }
        if self.unique && !self.primary_key {
            write!(f, " UNIQUE")?;
        }
        if let Some(default) = &self.default {
            if !self.primary_key {
                write!(f, " DEFAULT {}", default)?;
            }
        }
        Ok(())
    }
}

// ─── Policies ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOp {
    Select,
    Insert,
    Update,
    Delete,
}

impl PolicyOp {
    pub const ALL: [PolicyOp; 4] = [
        PolicyOp::Select,
        PolicyOp::Insert,
        PolicyOp::Update,
        PolicyOp::Delete,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            PolicyOp::Select => "SELECT",
            PolicyOp::Insert => "INSERT",
            PolicyOp::Update => "UPDATE",
            PolicyOp::Delete => "DELETE",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            PolicyOp::Select => "select",
            PolicyOp::Insert => "insert",
            PolicyOp::Update => "update",
            PolicyOp::Delete => "delete",
        }
    }
}

/// Right-hand side of the tenant filter `organization_id = <target>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgMatch {
    /// `<namespace>.current_organization_id()`
    Accessor(Ident),
    /// Literal organization id, for bulk provisioning.
    Literal(String),
}

impl fmt::Display for OrgMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrgMatch::Accessor(ns) => write!(f, "{}.{}()", ns, ORG_ACCESSOR_FN),
            OrgMatch::Literal(org) => f.write_str(&quote_literal(org)),
        }
    }
}

// ─── Statements ─────────────────────────────────────────────────────────────

/// Metadata row written after an apply.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    pub project_id: String,
    pub schema_version: i64,
    pub schema_hash: String,
    pub sync_status: String,
}

/// Every statement the engine sends to a cluster. Rendering happens only
/// through `Display`, after all identifiers were validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateSchema {
        namespace: Ident,
    },
    CreateOrgAccessor {
        namespace: Ident,
    },
    CreateMetadataTable {
        namespace: Ident,
    },
    CreateTable {
        table: QualifiedName,
        columns: Vec<ColumnSpec>,
    },
    AddColumn {
        table: QualifiedName,
        column: ColumnSpec,
    },
    DropColumn {
        table: QualifiedName,
        column: Ident,
    },
    RenameColumn {
        table: QualifiedName,
        from: Ident,
        to: Ident,
    },
    AlterColumnType {
        table: QualifiedName,
        column: Ident,
        sql_type: String,
    },
    AddForeignKey {
        table: QualifiedName,
        constraint: Ident,
        column: Ident,
        references: QualifiedName,
        references_column: Ident,
        on_delete: Option<&'static str>,
    },
    AddUniqueConstraint {
        table: QualifiedName,
        constraint: Ident,
        column: Ident,
    },
    DropTable {
        table: QualifiedName,
    },
    EnableRowLevelSecurity {
        table: QualifiedName,
    },
    CreatePolicy {
        table: QualifiedName,
        name: Ident,
        op: PolicyOp,
        org: OrgMatch,
    },
    UpsertMetadata {
        namespace: Ident,
        row: MetadataRow,
    },
    MarkMetadataFailed {
        namespace: Ident,
        project_id: String,
        error: String,
    },
    SelectMetadata {
        namespace: Ident,
        project_id: String,
    },
    DeleteMetadata {
        namespace: Ident,
        project_id: String,
    },
    ConstraintCatalog {
        namespace: Ident,
    },
}

impl Statement {
    /// Statements whose already-exists failure means the intent is satisfied.
    pub fn tolerates_existing(&self) -> bool {
        matches!(
            self,
            Statement::CreateSchema { .. }
                | Statement::AddColumn { .. }
                | Statement::CreatePolicy { .. }
                | Statement::AddForeignKey { .. }
                | Statement::AddUniqueConstraint { .. }
                | Statement::EnableRowLevelSecurity { .. }
        )
    }

    /// RLS and policy statements. Their failure never undoes the table they
    /// protect.
    pub fn is_access_control(&self) -> bool {
        matches!(
            self,
            Statement::EnableRowLevelSecurity { .. } | Statement::CreatePolicy { .. }
        )
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::CreateSchema { .. } => "create_schema",
            Statement::CreateOrgAccessor { .. } => "create_org_accessor",
            Statement::CreateMetadataTable { .. } => "create_metadata_table",
            Statement::CreateTable { .. } => "create_table",
            Statement::AddColumn { .. } => "add_column",
            Statement::DropColumn { .. } => "drop_column",
            Statement::RenameColumn { .. } => "rename_column",
            Statement::AlterColumnType { .. } => "alter_column_type",
            Statement::AddForeignKey { .. } => "add_foreign_key",
            Statement::AddUniqueConstraint { .. } => "add_unique_constraint",
            Statement::DropTable { .. } => "drop_table",
            Statement::EnableRowLevelSecurity { .. } => "enable_rls",
            Statement::CreatePolicy { .. } => "create_policy",
            Statement::UpsertMetadata { .. } => "upsert_metadata",
            Statement::MarkMetadataFailed { .. } => "mark_metadata_failed",
            Statement::SelectMetadata { .. } => "select_metadata",
            Statement::DeleteMetadata { .. } => "delete_metadata",
            Statement::ConstraintCatalog { .. } => "constraint_catalog",
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateSchema { namespace } => {
                write!(f, "CREATE SCHEMA IF NOT EXISTS {}", namespace)
            }
            Statement::CreateOrgAccessor { namespace } => write!(
                f,
                "CREATE OR REPLACE FUNCTION {}.{}() RETURNS TEXT LANGUAGE sql STABLE AS $$ SELECT NULLIF(current_setting('{}', true), '') $$",
                namespace, ORG_ACCESSOR_FN, ORG_SETTING
            ),
            Statement::CreateMetadataTable { namespace } => write!(
                f,
                "CREATE TABLE IF NOT EXISTS {}.{} (project_id TEXT PRIMARY KEY, schema_version INTEGER NOT NULL, schema_hash TEXT NOT NULL, sync_status TEXT NOT NULL, last_synced_at TIMESTAMPTZ, last_error TEXT)",
                namespace, METADATA_TABLE
            ),
            Statement::CreateTable { table, columns } => {
                let clauses: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
                write!(f, "CREATE TABLE {} ({})", table, clauses.join(", "))
            }
            Statement::AddColumn { table, column } => {
                write!(f, "ALTER TABLE {} ADD COLUMN {}", table, column)
            }
            Statement::DropColumn { table, column } => {
                write!(f, "ALTER TABLE {} DROP COLUMN {}", table, column)
            }
            Statement::RenameColumn { table, from, to } => {
                write!(f, "ALTER TABLE {} RENAME COLUMN {} TO {}", table, from, to)
            }
            Statement::AlterColumnType {
                table,
                column,
                sql_type,
            } => write!(
                f,
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                table, column, sql_type, column, sql_type
            ),
            Statement::AddForeignKey {
                table,
                constraint,
                column,
                references,
                references_column,
                on_delete,
            } => {
                write!(
                    f,
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    table, constraint, column, references, references_column
                )?;
                if let Some(action) = on_delete {
                    write!(f, " ON DELETE {}", action)?;
                }
                Ok(())
            }
            Statement::AddUniqueConstraint {
                table,
                constraint,
                column,
            } => write!(
                f,
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                table, constraint, column
            ),
            Statement::DropTable { table } => write!(f, "DROP TABLE IF EXISTS {} CASCADE", table),
            Statement::EnableRowLevelSecurity { table } => {
                write!(f, "ALTER TABLE {} ENABLE ROW LEVEL SECURITY", table)
            }
            Statement::CreatePolicy {
                table,
                name,
                op,
                org,
            } => {
                let predicate = format!("{} = {}", crate::schema::model::ORGANIZATION_COLUMN, org);
                write!(f, "CREATE POLICY {} ON {} FOR {}", name, table, op.as_sql())?;
                match op {
                    PolicyOp::Select | PolicyOp::Delete => write!(f, " USING ({})", predicate),
                    PolicyOp::Insert => write!(f, " WITH CHECK ({})", predicate),
                    PolicyOp::Update => {
                        write!(f, " USING ({}) WITH CHECK ({})", predicate, predicate)
                    }
                }
            }
            Statement::UpsertMetadata { namespace, row } => write!(
                f,
                "INSERT INTO {}.{} (project_id, schema_version, schema_hash, sync_status, last_synced_at, last_error) VALUES ({}, {}, {}, {}, now(), NULL) ON CONFLICT (project_id) DO UPDATE SET schema_version = EXCLUDED.schema_version, schema_hash = EXCLUDED.schema_hash, sync_status = EXCLUDED.sync_status, last_synced_at = EXCLUDED.last_synced_at, last_error = NULL",
                namespace,
                METADATA_TABLE,
                quote_literal(&row.project_id),
                row.schema_version,
                quote_literal(&row.schema_hash),
                quote_literal(&row.sync_status)
            ),
            Statement::MarkMetadataFailed {
                namespace,
                project_id,
                error,
            } => write!(
                f,
                "UPDATE {}.{} SET sync_status = 'failed', last_error = {} WHERE project_id = {}",
                namespace,
                METADATA_TABLE,
                quote_literal(error),
                quote_literal(project_id)
            ),
            Statement::SelectMetadata {
                namespace,
                project_id,
            } => write!(
                f,
                "SELECT project_id, schema_version, schema_hash, sync_status, last_synced_at::text AS last_synced_at, last_error FROM {}.{} WHERE project_id = {}",
                namespace,
                METADATA_TABLE,
                quote_literal(project_id)
            ),
            Statement::DeleteMetadata {
                namespace,
                project_id,
            } => write!(
                f,
                "DELETE FROM {}.{} WHERE project_id = {}",
                namespace,
                METADATA_TABLE,
                quote_literal(project_id)
            ),
            Statement::ConstraintCatalog { namespace } => write!(
                f,
                "SELECT tc.table_name, kcu.column_name, tc.constraint_type FROM information_schema.table_constraints tc JOIN information_schema.key_column_usage kcu ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema WHERE tc.table_schema = {} AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')",
                quote_literal(namespace.as_str())
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns() -> Ident {
        Ident::new("org_acme").unwrap()
    }

    #[test]
    fn test_ident_validation() {
        assert!(Ident::new("t_t1").is_ok());
        assert!(Ident::new("_private").is_ok());
        assert!(Ident::new("1abc").is_err());
        assert!(Ident::new("users; DROP TABLE x").is_err());
        assert!(Ident::new("na\"me").is_err());
        assert!(Ident::new("").is_err());
        assert!(Ident::new(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_derived_ident_truncates_with_digest() {
        let long_a = "c".repeat(40);
        let long_b = format!("{}x", "c".repeat(39));
        let a = Ident::derived(&["fk", "t_0123456789abcdef0123456789abcdef", &long_a]).unwrap();
        let b = Ident::derived(&["fk", "t_0123456789abcdef0123456789abcdef", &long_b]).unwrap();
        assert_eq!(a.as_str().len(), MAX_IDENT_LEN);
        assert_ne!(a, b);

        let short = Ident::derived(&["fk", "t_t2", "user_id"]).unwrap();
        assert_eq!(short.as_str(), "fk_t_t2_user_id");
    }

    #[test]
    fn test_column_clause_ordering() {
        let pk = ColumnSpec {
            name: Ident::new("id").unwrap(),
            sql_type: "UUID".to_string(),
            primary_key: true,
            not_null: true,
            unique: true,
            default: Some("gen_random_uuid()".to_string()),
        };
        assert_eq!(pk.to_string(), "id UUID PRIMARY KEY");

        let email = ColumnSpec {
            name: Ident::new("email").unwrap(),
            sql_type: "TEXT".to_string(),
            primary_key: false,
            not_null: true,
            unique: true,
            default: Some("''".to_string()),
        };
        assert_eq!(email.to_string(), "email TEXT NOT NULL UNIQUE DEFAULT ''");
    }

    #[test]
    fn test_policy_rendering() {
        let table = QualifiedName::new(&ns(), "t_t1").unwrap();
        let select = Statement::CreatePolicy {
            table: table.clone(),
            name: Ident::new("t_t1_select_org").unwrap(),
            op: PolicyOp::Select,
            org: OrgMatch::Accessor(ns()),
        };
        assert_eq!(
            select.to_string(),
            "CREATE POLICY t_t1_select_org ON org_acme.t_t1 FOR SELECT USING (organization_id = org_acme.current_organization_id())"
        );

        let update = Statement::CreatePolicy {
            table,
            name: Ident::new("t_t1_update_org").unwrap(),
            op: PolicyOp::Update,
            org: OrgMatch::Literal("acme".to_string()),
        };
        assert_eq!(
            update.to_string(),
            "CREATE POLICY t_t1_update_org ON org_acme.t_t1 FOR UPDATE USING (organization_id = 'acme') WITH CHECK (organization_id = 'acme')"
        );
    }

    #[test]
    fn test_metadata_literals_are_escaped() {
        let stmt = Statement::MarkMetadataFailed {
            namespace: ns(),
            project_id: "p1".to_string(),
            error: "relation \"x\" doesn't exist".to_string(),
        };
        assert!(stmt.to_string().contains("'relation \"x\" doesn''t exist'"));
    }

    #[test]
    fn test_tolerates_existing() {
        let table = QualifiedName::new(&ns(), "t_t1").unwrap();
        assert!(Statement::EnableRowLevelSecurity { table: table.clone() }.tolerates_existing());
        assert!(!Statement::DropTable { table }.tolerates_existing());
    }
}
