use serde::{Deserialize, Serialize};

use crate::ddl::{DdlGenerator, PolicyMode, Statement};
use crate::error::{SyncError, SyncResult};
use crate::schema::model::ORGANIZATION_COLUMN;
use crate::schema::{Column, NamingResolver, OnDelete, Relationship, RelationshipType, SchemaDesign, Table};

// ─── Wire format ────────────────────────────────────────────────────────────

/// A logical schema change as submitted by the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub organization_id: String,
    pub project_id: String,
    pub change: ChangeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSpec {
    #[serde(rename = "type")]
    pub change_type: String,
    /// Table id the change targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_def: Option<Table>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_def: Option<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKeySpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub column: String,
    /// Table id of the referenced table.
    pub references_table: String,
    pub references_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<OnDelete>,
}

// ─── Typed change ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    AddTable(Table),
    AddColumn { table_id: String, column: Column },
    DropColumn { table_id: String, column: String },
    RenameColumn { table_id: String, from: String, to: String },
    AlterColumnType { table_id: String, column: String, new_type: String },
    AddForeignKey { table_id: String, foreign_key: ForeignKeySpec },
    DropTable { table_id: String },
}

impl SchemaChange {
    pub fn change_type(&self) -> &'static str {
        match self {
            SchemaChange::AddTable(_) => "add_table",
            SchemaChange::AddColumn { .. } => "add_column",
            SchemaChange::DropColumn { .. } => "drop_column",
            SchemaChange::RenameColumn { .. } => "rename_column",
            SchemaChange::AlterColumnType { .. } => "alter_column_type",
            SchemaChange::AddForeignKey { .. } => "add_foreign_key",
            SchemaChange::DropTable { .. } => "drop_table",
        }
    }

    pub fn table_id(&self) -> &str {
        match self {
            SchemaChange::AddTable(table) => &table.id,
            SchemaChange::AddColumn { table_id, .. }
            | SchemaChange::DropColumn { table_id, .. }
            | SchemaChange::RenameColumn { table_id, .. }
            | SchemaChange::AlterColumnType { table_id, .. }
            | SchemaChange::AddForeignKey { table_id, .. }
            | SchemaChange::DropTable { table_id } => table_id,
        }
    }
}

fn required<'a>(value: &'a Option<String>, field: &str, change_type: &str) -> SyncResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SyncError::InvalidChange(format!(
            "{} requires '{}'",
            change_type, field
        ))),
    }
}

/// The column a change names: `old_name`, else `column_def.name`.
fn named_column(spec: &ChangeSpec) -> SyncResult<String> {
    spec.old_name
        .clone()
        .or_else(|| spec.column_def.as_ref().map(|c| c.name.clone()))
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| {
            SyncError::InvalidChange(format!("{} requires 'old_name' or 'column_def'", spec.change_type))
        })
}

impl TryFrom<&ChangeSpec> for SchemaChange {
    type Error = SyncError;

    fn try_from(spec: &ChangeSpec) -> SyncResult<Self> {
        let kind = spec.change_type.as_str();
        match kind {
            "add_table" => {
                let mut table = spec
                    .table_def
                    .clone()
                    .ok_or_else(|| SyncError::InvalidChange("add_table requires 'table_def'".to_string()))?;
                if table.id.trim().is_empty() {
                    table.id = required(&spec.table, "table", kind)?.to_string();
                }
                if table.name.trim().is_empty() {
                    table.name = table.id.clone();
                }
                Ok(SchemaChange::AddTable(table))
            }
            "add_column" => Ok(SchemaChange::AddColumn {
                table_id: required(&spec.table, "table", kind)?.to_string(),
                column: spec
                    .column_def
                    .clone()
                    .ok_or_else(|| SyncError::InvalidChange("add_column requires 'column_def'".to_string()))?,
            }),
            "drop_column" => Ok(SchemaChange::DropColumn {
                table_id: required(&spec.table, "table", kind)?.to_string(),
                column: named_column(spec)?,
            }),
            "rename_column" => Ok(SchemaChange::RenameColumn {
                table_id: required(&spec.table, "table", kind)?.to_string(),
                from: required(&spec.old_name, "old_name", kind)?.to_string(),
                to: required(&spec.new_name, "new_name", kind)?.to_string(),
            }),
            "alter_column_type" => {
                let new_type = spec
                    .new_type
                    .clone()
                    .or_else(|| spec.column_def.as_ref().map(|c| c.column_type.clone()));
                Ok(SchemaChange::AlterColumnType {
                    table_id: required(&spec.table, "table", kind)?.to_string(),
                    column: named_column(spec)?,
                    new_type: required(&new_type, "new_type", kind)?.to_string(),
                })
            }
            "add_foreign_key" => Ok(SchemaChange::AddForeignKey {
                table_id: required(&spec.table, "table", kind)?.to_string(),
                foreign_key: spec.foreign_key.clone().ok_or_else(|| {
                    SyncError::InvalidChange("add_foreign_key requires 'foreign_key'".to_string())
                })?,
            }),
            "drop_table" => Ok(SchemaChange::DropTable {
                table_id: required(&spec.table, "table", kind)?.to_string(),
            }),
            other => Err(SyncError::InvalidChange(format!("unknown change type '{}'", other))),
        }
    }
}

// ─── Planning ───────────────────────────────────────────────────────────────

/// Statements for one change plus the design as it will be once they ran.
#[derive(Debug, Clone)]
pub struct ChangePlan {
    pub statements: Vec<Statement>,
    /// Physical name of the table the change targets.
    pub internal_name: String,
    pub design: SchemaDesign,
    /// The table was already part of the design (only meaningful for
    /// `add_table`).
    pub table_known: bool,
}

fn find_table<'a>(design: &'a SchemaDesign, table_id: &str) -> SyncResult<&'a Table> {
    design
        .table(table_id)
        .ok_or_else(|| SyncError::UnknownTable(table_id.to_string()))
}

fn find_column<'a>(table: &'a Table, column: &str) -> SyncResult<&'a Column> {
    table.column(column).ok_or_else(|| SyncError::UnknownColumn {
        table: table.id.clone(),
        column: column.to_string(),
    })
}

fn reject_system_column(name: &str) -> SyncResult<()> {
    if name == ORGANIZATION_COLUMN {
        return Err(SyncError::InvalidChange(format!(
            "column '{}' is managed by the engine",
            ORGANIZATION_COLUMN
        )));
    }
    Ok(())
}

/// Resolve table ids, validate the change against the current design and
/// generate its statements. Nothing is executed.
pub fn plan_change(
    change: &SchemaChange,
    design: &SchemaDesign,
    naming: &NamingResolver,
    ddl: &DdlGenerator,
) -> SyncResult<ChangePlan> {
    let mut next = design.clone();

    let (statements, internal_name, table_known) = match change {
        SchemaChange::AddTable(table) => {
            let existing = design.table(&table.id);
            let internal_name = match existing {
                Some(known) => known.physical_name(naming),
                None => naming.internal_name(&table.id),
            };
            let mut statements = Vec::new();
            if let Some(create) = ddl.create_table(&internal_name, &table.columns)? {
                statements.push(create);
                statements.extend(ddl.access_policies(&internal_name, &PolicyMode::Accessor)?);
            }
            if existing.is_none() && !statements.is_empty() {
                let mut stored = table.clone();
                stored.internal_name = Some(internal_name.clone());
                stored.columns.retain(|c| c.name != ORGANIZATION_COLUMN);
                next.tables.push(stored);
            }
            (statements, internal_name, existing.is_some())
        }

        SchemaChange::AddColumn { table_id, column } => {
            let table = find_table(design, table_id)?;
            reject_system_column(&column.name)?;
            if table.column(&column.name).is_some() {
                return Err(SyncError::InvalidChange(format!(
                    "column '{}' already exists on table '{}'",
                    column.name, table_id
                )));
            }
            let internal_name = table.physical_name(naming);
            let statement = ddl.add_column(&internal_name, column)?;
            if let Some(t) = next.table_mut(table_id) {
                t.columns.push(column.clone());
            }
            (vec![statement], internal_name, true)
        }

        SchemaChange::DropColumn { table_id, column } => {
            let table = find_table(design, table_id)?;
            reject_system_column(column)?;
            find_column(table, column)?;
            let internal_name = table.physical_name(naming);
            let statement = ddl.drop_column(&internal_name, column)?;
            if let Some(t) = next.table_mut(table_id) {
                t.columns.retain(|c| &c.name != column);
            }
            next.relationships.retain(|r| {
                !(r.source_table_id == *table_id && r.source_column == *column)
                    && !(r.target_table_id == *table_id && r.target_column == *column)
            });
            (vec![statement], internal_name, true)
        }

        SchemaChange::RenameColumn { table_id, from, to } => {
            let table = find_table(design, table_id)?;
            reject_system_column(from)?;
            reject_system_column(to)?;
            find_column(table, from)?;
            if table.column(to).is_some() {
                return Err(SyncError::InvalidChange(format!(
                    "column '{}' already exists on table '{}'",
                    to, table_id
                )));
            }
            let internal_name = table.physical_name(naming);
            let statement = ddl.rename_column(&internal_name, from, to)?;
            if let Some(c) = next.table_mut(table_id).and_then(|t| t.column_mut(from)) {
                c.name = to.clone();
            }
            for r in next.relationships.iter_mut() {
                if r.source_table_id == *table_id && r.source_column == *from {
                    r.source_column = to.clone();
                }
                if r.target_table_id == *table_id && r.target_column == *from {
                    r.target_column = to.clone();
                }
            }
            (vec![statement], internal_name, true)
        }

        SchemaChange::AlterColumnType { table_id, column, new_type } => {
            let table = find_table(design, table_id)?;
            reject_system_column(column)?;
            find_column(table, column)?;
            let internal_name = table.physical_name(naming);
            let statement = ddl.alter_column_type(&internal_name, column, new_type)?;
            if let Some(c) = next.table_mut(table_id).and_then(|t| t.column_mut(column)) {
                c.column_type = new_type.clone();
            }
            (vec![statement], internal_name, true)
        }

        SchemaChange::AddForeignKey { table_id, foreign_key } => {
            let table = find_table(design, table_id)?;
            find_column(table, &foreign_key.column)?;
            let target = find_table(design, &foreign_key.references_table)?;
            find_column(target, &foreign_key.references_column)?;
            let internal_name = table.physical_name(naming);
            let statement = ddl.add_foreign_key(
                &internal_name,
                &foreign_key.column,
                &target.physical_name(naming),
                &foreign_key.references_column,
                foreign_key.on_delete,
            )?;
            let exists = next.relationships.iter().any(|r| {
                r.source_table_id == *table_id && r.source_column == foreign_key.column
            });
            if !exists {
                next.relationships.push(Relationship {
                    id: format!("{}.{}", table_id, foreign_key.column),
                    source_table_id: table_id.clone(),
                    source_column: foreign_key.column.clone(),
                    target_table_id: foreign_key.references_table.clone(),
                    target_column: foreign_key.references_column.clone(),
                    relationship_type: RelationshipType::OneToMany,
                    on_delete: foreign_key.on_delete,
                });
            }
            (vec![statement], internal_name, true)
        }

        SchemaChange::DropTable { table_id } => {
            let table = find_table(design, table_id)?;
            let internal_name = table.physical_name(naming);
            let statement = ddl.drop_table(&internal_name)?;
            next.tables.retain(|t| &t.id != table_id);
            next.relationships
                .retain(|r| &r.source_table_id != table_id && &r.target_table_id != table_id);
            (vec![statement], internal_name, true)
        }
    };

    Ok(ChangePlan {
        statements,
        internal_name,
        design: next,
        table_known,
    })
}

/// Foreign keys implied by a design's relationships, in relationship order.
/// Relationships pointing at unknown tables are skipped.
pub fn relationship_foreign_keys(
    design: &SchemaDesign,
    naming: &NamingResolver,
    ddl: &DdlGenerator,
) -> SyncResult<Vec<(String, Statement)>> {
    let mut relationships: Vec<&Relationship> =
        design.relationships.iter().filter(|r| r.has_foreign_key()).collect();
    relationships.sort_by(|a, b| a.id.cmp(&b.id));

    let mut statements = Vec::new();
    for r in relationships {
        let (Some(source), Some(target)) = (design.table(&r.source_table_id), design.table(&r.target_table_id)) else {
            continue;
        };
        statements.push((
            r.id.clone(),
            ddl.add_foreign_key(
                &source.physical_name(naming),
                &r.source_column,
                &target.physical_name(naming),
                &r.target_column,
                r.on_delete,
            )?,
        ));
    }
    Ok(statements)
}
