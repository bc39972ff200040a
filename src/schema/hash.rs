use serde::Serialize;
use sha2::{Digest, Sha256};

use super::model::{OnDelete, RelationshipType, SchemaDesign};
use super::types::{canonical_default, normalize_type_lenient};

/// Number of hex characters shown when a hash is reported to users.
pub const HASH_PREFIX_LEN: usize = 12;

#[derive(Serialize)]
struct NormalizedSchema<'a> {
    tables: Vec<NormalizedTable<'a>>,
    relationships: Vec<NormalizedRelationship<'a>>,
}

#[derive(Serialize)]
struct NormalizedTable<'a> {
    name: &'a str,
    id: &'a str,
    columns: Vec<NormalizedColumn<'a>>,
}

#[derive(Serialize)]
struct NormalizedColumn<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    column_type: String,
    primary_key: bool,
    nullable: bool,
    unique: bool,
    default: Option<String>,
    auto_generate: bool,
    auto_increment: bool,
}

#[derive(Serialize)]
struct NormalizedRelationship<'a> {
    id: &'a str,
    source_table_id: &'a str,
    source_column: &'a str,
    target_table_id: &'a str,
    target_column: &'a str,
    #[serde(rename = "type")]
    relationship_type: RelationshipType,
    on_delete: Option<OnDelete>,
}

fn normalize(schema: &SchemaDesign) -> NormalizedSchema<'_> {
    let mut tables: Vec<NormalizedTable<'_>> = schema
        .tables
        .iter()
        .map(|table| {
            let mut columns: Vec<NormalizedColumn<'_>> = table
                .user_columns()
                .map(|c| NormalizedColumn {
                    name: &c.name,
                    column_type: normalize_type_lenient(&c.column_type),
                    primary_key: c.is_primary_key,
                    nullable: c.is_nullable,
                    unique: c.is_unique,
                    default: canonical_default(c.default_value.as_deref()),
                    auto_generate: c.is_auto_generate,
                    auto_increment: c.is_auto_increment,
                })
                .collect();
            columns.sort_by(|a, b| a.name.cmp(b.name));
            NormalizedTable {
                name: &table.name,
                id: &table.id,
                columns,
            }
        })
        .collect();
    tables.sort_by(|a, b| a.name.cmp(b.name).then_with(|| a.id.cmp(b.id)));

    let mut relationships: Vec<NormalizedRelationship<'_>> = schema
        .relationships
        .iter()
        .map(|r| NormalizedRelationship {
            id: &r.id,
            source_table_id: &r.source_table_id,
            source_column: &r.source_column,
            target_table_id: &r.target_table_id,
            target_column: &r.target_column,
            relationship_type: r.relationship_type,
            on_delete: r.on_delete,
        })
        .collect();
    relationships.sort_by(|a, b| a.id.cmp(b.id));

    NormalizedSchema {
        tables,
        relationships,
    }
}

/// SHA-256 (hex) over the normalized schema. Equal for schemas that differ
/// only in ordering or in equivalent default spellings.
pub fn compute_hash(schema: &SchemaDesign) -> String {
    let normalized = normalize(schema);
    // Serializing plain structs of strings and bools cannot fail.
    let canonical = serde_json::to_vec(&normalized).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// Short form used in reports.
pub fn hash_prefix(hash: &str) -> String {
    hash.chars().take(HASH_PREFIX_LEN).collect()
}
