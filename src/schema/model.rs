use serde::{Deserialize, Serialize};

use super::naming::NamingResolver;

/// Name of the system column every materialized table carries for tenant
/// row filtering.
pub const ORGANIZATION_COLUMN: &str = "organization_id";

// ─── Schema Design ──────────────────────────────────────────────────────────

/// The logical schema of a project, as authored in the editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDesign {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl SchemaDesign {
    pub fn table(&self, id: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn table_mut(&mut self, id: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == id)
    }

    /// Relationships whose foreign key lives on (or points at) the given table.
    pub fn relationships_touching(&self, table_id: &str) -> impl Iterator<Item = &Relationship> {
        let table_id = table_id.to_string();
        self.relationships
            .iter()
            .filter(move |r| r.source_table_id == table_id || r.target_table_id == table_id)
    }
}

// ─── Table ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub name: String,
    /// Physical identifier. Designs written before internal names existed
    /// leave this empty; see [`Table::physical_name`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_name: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Table {
    /// Resolve the physical table name, falling back to the id-derived name.
    /// The display name is never used.
    pub fn physical_name(&self, naming: &NamingResolver) -> String {
        match &self.internal_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => naming.internal_name(&self.id),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Columns authored by the user (system columns excluded).
    pub fn user_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_system_column())
    }
}

// ─── Column ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default = "default_nullable")]
    pub is_nullable: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub is_auto_generate: bool,
    #[serde(default)]
    pub is_auto_increment: bool,
    #[serde(default)]
    pub is_system: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    /// A nullable, non-key column with no default.
    pub fn new(name: &str, column_type: &str) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            column_type: column_type.to_string(),
            is_primary_key: false,
            is_nullable: true,
            is_unique: false,
            default_value: None,
            is_auto_generate: false,
            is_auto_increment: false,
            is_system: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn is_system_column(&self) -> bool {
        self.is_system || self.name == ORGANIZATION_COLUMN
    }

    /// Whether the physical column must carry a UNIQUE or PRIMARY KEY constraint.
    pub fn requires_unique_constraint(&self) -> bool {
        self.is_unique || self.is_primary_key
    }
}

// ─── Relationship ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl OnDelete {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::NoAction => "NO ACTION",
        }
    }
}

/// A reference from `source_table_id.source_column` to
/// `target_table_id.target_column`. The foreign key lives on the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    #[serde(default)]
    pub id: String,
    pub source_table_id: String,
    pub source_column: String,
    pub target_table_id: String,
    pub target_column: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<OnDelete>,
}

impl Relationship {
    /// Many-to-many links are modelled through a junction table and carry
    /// no direct foreign key.
    pub fn has_foreign_key(&self) -> bool {
        self.relationship_type != RelationshipType::ManyToMany
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_nullable_defaults_to_true() {
        let col: Column = serde_json::from_str(r#"{"name": "age", "type": "integer"}"#).unwrap();
        assert!(col.is_nullable);
        assert!(!col.is_primary_key);

        let col: Column =
            serde_json::from_str(r#"{"name": "email", "type": "text", "isNullable": false, "isUnique": true}"#)
                .unwrap();
        assert!(!col.is_nullable);
        assert!(col.is_unique);
    }

    #[test]
    fn test_physical_name_falls_back_to_id() {
        let naming = NamingResolver::default();
        let mut table = Table {
            id: "t1".to_string(),
            name: "users".to_string(),
            internal_name: None,
            columns: vec![],
        };
        assert_eq!(table.physical_name(&naming), "t_t1");

        table.internal_name = Some(String::new());
        assert_eq!(table.physical_name(&naming), "t_t1");

        table.internal_name = Some("t_legacy".to_string());
        assert_eq!(table.physical_name(&naming), "t_legacy");
    }

    #[test]
    fn test_relationship_type_wire_format() {
        let rel: Relationship = serde_json::from_str(
            r#"{"id": "r1", "sourceTableId": "t2", "sourceColumn": "user_id",
                "targetTableId": "t1", "targetColumn": "id", "type": "one-to-many"}"#,
        )
        .unwrap();
        assert_eq!(rel.relationship_type, RelationshipType::OneToMany);
        assert!(rel.has_foreign_key());
        assert!(rel.on_delete.is_none());
    }

    #[test]
    fn test_organization_column_is_system() {
        assert!(Column::new(ORGANIZATION_COLUMN, "text").is_system_column());
        assert!(!Column::new("email", "text").is_system_column());
    }
}
