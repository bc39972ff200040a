use super::policy::{tenant_policies, PolicyMode};
use super::statement::{ColumnSpec, Ident, MetadataRow, QualifiedName, Statement, ORG_ACCESSOR_FN};
use crate::error::SyncResult;
use crate::schema::model::{Column, OnDelete, ORGANIZATION_COLUMN};
use crate::schema::types::{canonical_default, default_expression, physical_type};

/// Builds statements for one tenant namespace. Never executes anything.
#[derive(Debug, Clone)]
pub struct DdlGenerator {
    namespace: Ident,
}

impl DdlGenerator {
    pub fn new(namespace: &str) -> SyncResult<Self> {
        Ok(Self {
            namespace: Ident::new(namespace)?,
        })
    }

    pub fn namespace(&self) -> &Ident {
        &self.namespace
    }

    pub fn qualify(&self, internal_name: &str) -> SyncResult<QualifiedName> {
        QualifiedName::new(&self.namespace, internal_name)
    }

    /// Column clause for a user column.
    pub fn column_spec(&self, column: &Column) -> SyncResult<ColumnSpec> {
        let default = canonical_default(column.default_value.as_deref()).map(|d| default_expression(&d));
        Ok(ColumnSpec {
            name: Ident::new(&column.name)?,
            sql_type: physical_type(&column.column_type, column.is_auto_increment)?,
            primary_key: column.is_primary_key,
            not_null: !column.is_nullable,
            unique: column.is_unique,
            default,
        })
    }

    fn organization_column(&self) -> SyncResult<ColumnSpec> {
        Ok(ColumnSpec {
            name: Ident::new(ORGANIZATION_COLUMN)?,
            sql_type: "TEXT".to_string(),
            primary_key: false,
            not_null: true,
            unique: false,
            default: Some(format!("{}.{}()", self.namespace, ORG_ACCESSOR_FN)),
        })
    }

    // ─── Namespace ──────────────────────────────────────────────────────────

    /// Schema, accessor function and metadata table, all idempotent.
    pub fn provision(&self) -> Vec<Statement> {
        vec![
            Statement::CreateSchema {
                namespace: self.namespace.clone(),
            },
            Statement::CreateOrgAccessor {
                namespace: self.namespace.clone(),
            },
            Statement::CreateMetadataTable {
                namespace: self.namespace.clone(),
            },
        ]
    }

    // ─── Tables ─────────────────────────────────────────────────────────────

    /// CREATE TABLE for a column list. `None` for a table without columns.
    pub fn create_table(&self, internal_name: &str, columns: &[Column]) -> SyncResult<Option<Statement>> {
        if columns.is_empty() {
            return Ok(None);
        }
        let mut specs = columns
            .iter()
            .filter(|c| c.name != ORGANIZATION_COLUMN)
            .map(|c| self.column_spec(c))
            .collect::<SyncResult<Vec<_>>>()?;
        specs.push(self.organization_column()?);

        Ok(Some(Statement::CreateTable {
            table: self.qualify(internal_name)?,
            columns: specs,
        }))
    }

    pub fn drop_table(&self, internal_name: &str) -> SyncResult<Statement> {
        Ok(Statement::DropTable {
            table: self.qualify(internal_name)?,
        })
    }

    /// RLS enable followed by the four tenant policies.
    pub fn access_policies(&self, internal_name: &str, mode: &PolicyMode) -> SyncResult<Vec<Statement>> {
        let table = self.qualify(internal_name)?;
        let mut statements = vec![Statement::EnableRowLevelSecurity {
            table: table.clone(),
        }];
        statements.extend(tenant_policies(&table, mode)?);
        Ok(statements)
    }

    // ─── Columns ────────────────────────────────────────────────────────────

    pub fn add_column(&self, internal_name: &str, column: &Column) -> SyncResult<Statement> {
        Ok(Statement::AddColumn {
            table: self.qualify(internal_name)?,
            column: self.column_spec(column)?,
        })
    }

    pub fn drop_column(&self, internal_name: &str, column: &str) -> SyncResult<Statement> {
        Ok(Statement::DropColumn {
            table: self.qualify(internal_name)?,
            column: Ident::new(column)?,
        })
    }

    pub fn rename_column(&self, internal_name: &str, from: &str, to: &str) -> SyncResult<Statement> {
        Ok(Statement::RenameColumn {
            table: self.qualify(internal_name)?,
            from: Ident::new(from)?,
            to: Ident::new(to)?,
        })
    }

    pub fn alter_column_type(&self, internal_name: &str, column: &str, new_type: &str) -> SyncResult<Statement> {
        Ok(Statement::AlterColumnType {
            table: self.qualify(internal_name)?,
            column: Ident::new(column)?,
            sql_type: physical_type(new_type, false)?,
        })
    }

    // ─── Constraints ────────────────────────────────────────────────────────

    /// Constraint name: `fk_<internal>_<column>`.
    pub fn add_foreign_key(
        &self,
        internal_name: &str,
        column: &str,
        references_internal: &str,
        references_column: &str,
        on_delete: Option<OnDelete>,
    ) -> SyncResult<Statement> {
        let column = Ident::new(column)?;
        Ok(Statement::AddForeignKey {
            table: self.qualify(internal_name)?,
            constraint: Ident::derived(&["fk", internal_name, column.as_str()])?,
            column,
            references: self.qualify(references_internal)?,
            references_column: Ident::new(references_column)?,
            on_delete: on_delete.map(|a| a.as_sql()),
        })
    }

    /// Constraint name: `uq_<internal>_<column>`.
    pub fn add_unique_constraint(&self, internal_name: &str, column: &str) -> SyncResult<Statement> {
        let column = Ident::new(column)?;
        Ok(Statement::AddUniqueConstraint {
            table: self.qualify(internal_name)?,
            constraint: Ident::derived(&["uq", internal_name, column.as_str()])?,
            column,
        })
    }

    pub fn constraint_catalog(&self) -> Statement {
        Statement::ConstraintCatalog {
            namespace: self.namespace.clone(),
        }
    }

    // ─── Slave Metadata ─────────────────────────────────────────────────────

    pub fn upsert_metadata(&self, project_id: &str, version: i64, hash: &str, status: &str) -> Statement {
        Statement::UpsertMetadata {
            namespace: self.namespace.clone(),
            row: MetadataRow {
                project_id: project_id.to_string(),
                schema_version: version,
                schema_hash: hash.to_string(),
                sync_status: status.to_string(),
            },
        }
    }

    pub fn mark_metadata_failed(&self, project_id: &str, error: &str) -> Statement {
        Statement::MarkMetadataFailed {
            namespace: self.namespace.clone(),
            project_id: project_id.to_string(),
            error: error.to_string(),
        }
    }

    pub fn select_metadata(&self, project_id: &str) -> Statement {
        Statement::SelectMetadata {
            namespace: self.namespace.clone(),
            project_id: project_id.to_string(),
        }
    }

    pub fn delete_metadata(&self, project_id: &str) -> Statement {
        Statement::DeleteMetadata {
            namespace: self.namespace.clone(),
            project_id: project_id.to_string(),
        }
    }
}
