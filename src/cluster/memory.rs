use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing::debug;

use super::{sqlstate, ExecError, SqlExecutor};
use crate::ddl::statement::METADATA_TABLE;

// ─── Catalog ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MemColumn {
    pub name: String,
    pub sql_type: String,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
}

impl ConstraintKind {
    fn as_sql(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::ForeignKey => "FOREIGN KEY",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemConstraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub column: String,
    /// `(namespace, table)` for foreign keys.
    pub references: Option<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct MemTable {
    pub columns: Vec<MemColumn>,
    pub constraints: Vec<MemConstraint>,
    pub rls_enabled: bool,
    pub policies: Vec<String>,
}

impl MemTable {
    fn column(&self, name: &str) -> Option<&MemColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Default)]
struct MetadataRecord {
    schema_version: i64,
    schema_hash: String,
    sync_status: String,
    last_synced_at: Option<String>,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct MemNamespace {
    tables: BTreeMap<String, MemTable>,
    functions: Vec<String>,
    metadata: BTreeMap<String, MetadataRecord>,
}

#[derive(Debug, Default)]
struct Catalog {
    namespaces: BTreeMap<String, MemNamespace>,
}

// ─── Statement Patterns ─────────────────────────────────────────────────────

const LITERAL: &str = r"'((?:[^']|'')*)'";

struct Patterns {
    create_schema: Regex,
    create_function: Regex,
    create_table: Regex,
    alter_table: Regex,
    add_column: Regex,
    drop_column: Regex,
    rename_column: Regex,
    alter_type: Regex,
    add_fk: Regex,
    add_unique: Regex,
    drop_constraint: Regex,
    drop_table: Regex,
    create_policy: Regex,
    upsert_metadata: Regex,
    fail_metadata: Regex,
    select_metadata: Regex,
    delete_metadata: Regex,
    constraint_catalog: Regex,
    select_all: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("static memory cluster pattern");
        Patterns {
            create_schema: re(r"^CREATE SCHEMA (IF NOT EXISTS )?(\w+)$"),
            create_function: re(r"^CREATE (?:OR REPLACE )?FUNCTION (\w+)\.(\w+)\(\)"),
            create_table: re(r"(?s)^CREATE TABLE (IF NOT EXISTS )?(\w+)\.(\w+) \((.*)\)$"),
            alter_table: re(r"(?s)^ALTER TABLE (\w+)\.(\w+) (.*)$"),
            add_column: re(r"(?s)^ADD COLUMN (.*)$"),
            drop_column: re(r"^DROP COLUMN (\w+)$"),
            rename_column: re(r"^RENAME COLUMN (\w+) TO (\w+)$"),
            alter_type: re(r"^ALTER COLUMN (\w+) TYPE (.+?)(?: USING .*)?$"),
            add_fk: re(
                r"^ADD CONSTRAINT (\w+) FOREIGN KEY \((\w+)\) REFERENCES (\w+)\.(\w+) \((\w+)\)(?: ON DELETE .*)?$",
            ),
            add_unique: re(r"^ADD CONSTRAINT (\w+) UNIQUE \((\w+)\)$"),
            drop_constraint: re(r"^DROP CONSTRAINT (\w+)$"),
            drop_table: re(r"^DROP TABLE (IF EXISTS )?(\w+)\.(\w+)( CASCADE)?$"),
            create_policy: re(r"^CREATE POLICY (\w+) ON (\w+)\.(\w+) FOR (SELECT|INSERT|UPDATE|DELETE) "),
            upsert_metadata: re(&format!(
                r"^INSERT INTO (\w+)\.{} \(.*?\) VALUES \({}, (\d+), {}, {}, now\(\), NULL\)",
                METADATA_TABLE, LITERAL, LITERAL, LITERAL
            )),
            fail_metadata: re(&format!(
                r"^UPDATE (\w+)\.{} SET sync_status = 'failed', last_error = {} WHERE project_id = {}$",
                METADATA_TABLE, LITERAL, LITERAL
            )),
            select_metadata: re(&format!(
                r"^SELECT .* FROM (\w+)\.{} WHERE project_id = {}$",
                METADATA_TABLE, LITERAL
            )),
            delete_metadata: re(&format!(
                r"^DELETE FROM (\w+)\.{} WHERE project_id = {}$",
                METADATA_TABLE, LITERAL
            )),
            constraint_catalog: re(
                r"information_schema\.table_constraints .* WHERE tc\.table_schema = '(\w+)'",
            ),
            select_all: re(r"^SELECT \* FROM (\w+)\.(\w+)$"),
        }
    })
}

fn unescape(s: &str) -> String {
    s.replace("''", "'")
}

fn err(code: &str, message: String) -> ExecError {
    ExecError::new(Some(code), &message)
}

/// Split a column list on top-level commas (outside parentheses and quotes).
fn split_top_level(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut current = String::new();
    for ch in list.chars() {
        match ch {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            ',' if !in_quote && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Parse `name TYPE [PRIMARY KEY|NOT NULL] [UNIQUE] [DEFAULT expr]`.
fn parse_column_clause(clause: &str) -> Result<MemColumn, ExecError> {
    let (name, rest) = clause
        .split_once(' ')
        .ok_or_else(|| err(sqlstate::SYNTAX_ERROR, format!("bad column clause: {}", clause)))?;

    let (head, default) = match rest.split_once(" DEFAULT ") {
        Some((head, default)) => (head, Some(default.trim().to_string())),
        None => (rest, None),
    };
    let primary_key = head.contains(" PRIMARY KEY");
    let not_null = head.contains(" NOT NULL") || primary_key;
    let unique = head.contains(" UNIQUE");
    let sql_type = head
        .split(" PRIMARY KEY")
        .next()
        .and_then(|s| s.split(" NOT NULL").next())
        .and_then(|s| s.split(" UNIQUE").next())
        .unwrap_or(head)
        .trim()
        .to_string();

    Ok(MemColumn {
        name: name.to_string(),
        sql_type,
        primary_key,
        not_null,
        unique,
        default,
    })
}

// ─── Cluster ────────────────────────────────────────────────────────────────

/// In-process cluster that understands the DDL dialect the engine emits.
///
/// Used by tests and by `memory://` endpoints for dry runs. Errors carry the
/// same SQLSTATE codes a PostgreSQL server would return.
pub struct MemoryCluster {
    endpoint: String,
    catalog: Mutex<Catalog>,
    log: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, ExecError)>>,
    deny_ddl: AtomicBool,
}

impl MemoryCluster {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            catalog: Mutex::new(Catalog::default()),
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            deny_ddl: AtomicBool::new(false),
        }
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ─── Test Controls ──────────────────────────────────────────────────────

    /// Fail every statement containing `needle` with the given error.
    pub fn fail_on(&self, needle: &str, error: ExecError) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((needle.to_string(), error));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Reject every DDL statement with insufficient privilege.
    pub fn deny_ddl(&self, deny: bool) {
        self.deny_ddl.store(deny, Ordering::SeqCst);
    }

    /// Every statement received, in order, including failed ones.
    pub fn executed(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    // ─── Inspection ─────────────────────────────────────────────────────────

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.catalog().namespaces.contains_key(namespace)
    }

    pub fn table_names(&self, namespace: &str) -> Vec<String> {
        self.catalog()
            .namespaces
            .get(namespace)
            .map(|ns| ns.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn table(&self, namespace: &str, table: &str) -> Option<MemTable> {
        self.catalog()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.tables.get(table).cloned())
    }

    // ─── Interpreter ────────────────────────────────────────────────────────

    fn run(&self, sql: &str) -> Result<Vec<Value>, ExecError> {
        let p = patterns();
        let mut catalog = self.catalog();

        if let Some(c) = p.create_schema.captures(sql) {
            let name = c[2].to_string();
            if catalog.namespaces.contains_key(&name) {
                if c.get(1).is_none() {
                    return Err(err(
                        sqlstate::DUPLICATE_SCHEMA,
                        format!("schema \"{}\" already exists", name),
                    ));
                }
                return Ok(vec![]);
            }
            catalog.namespaces.insert(name, MemNamespace::default());
            return Ok(vec![]);
        }

        if let Some(c) = p.create_function.captures(sql) {
            let ns = namespace_mut(&mut catalog, &c[1])?;
            let function = c[2].to_string();
            if !ns.functions.contains(&function) {
                ns.functions.push(function);
            }
            return Ok(vec![]);
        }

        if let Some(c) = p.create_table.captures(sql) {
            return create_table(&mut catalog, &c);
        }

        if let Some(c) = p.alter_table.captures(sql) {
            return alter_table(&mut catalog, &c[1], &c[2], c[3].trim());
        }

        if let Some(c) = p.drop_table.captures(sql) {
            let ns_name = c[2].to_string();
            let table = c[3].to_string();
            let ns = namespace_mut(&mut catalog, &ns_name)?;
            if ns.tables.remove(&table).is_none() && c.get(1).is_none() {
                return Err(err(
                    sqlstate::UNDEFINED_TABLE,
                    format!("table \"{}\" does not exist", table),
                ));
            }
            if c.get(4).is_some() {
                for other in ns.tables.values_mut() {
                    other.constraints.retain(|k| {
                        k.references.as_ref() != Some(&(ns_name.clone(), table.clone()))
                    });
                }
            }
            return Ok(vec![]);
        }

        if let Some(c) = p.create_policy.captures(sql) {
            let name = c[1].to_string();
            let target = table_mut(&mut catalog, &c[2], &c[3])?;
            if target.policies.contains(&name) {
                return Err(err(
                    sqlstate::DUPLICATE_OBJECT,
                    format!("policy \"{}\" for table \"{}\" already exists", name, &c[3]),
                ));
            }
            target.policies.push(name);
            return Ok(vec![]);
        }

        if let Some(c) = p.upsert_metadata.captures(sql) {
            let ns = metadata_namespace(&mut catalog, &c[1])?;
            let version: i64 = c[3].parse().unwrap_or_default();
            ns.metadata.insert(
                unescape(&c[2]),
                MetadataRecord {
                    schema_version: version,
                    schema_hash: unescape(&c[4]),
                    sync_status: unescape(&c[5]),
                    last_synced_at: Some(chrono::Utc::now().to_rfc3339()),
                    last_error: None,
                },
            );
            return Ok(vec![]);
        }

        if let Some(c) = p.fail_metadata.captures(sql) {
            let ns = metadata_namespace(&mut catalog, &c[1])?;
            if let Some(record) = ns.metadata.get_mut(&unescape(&c[3])) {
                record.sync_status = "failed".to_string();
                record.last_error = Some(unescape(&c[2]));
            }
            return Ok(vec![]);
        }

        if let Some(c) = p.select_metadata.captures(sql) {
            let ns = metadata_namespace(&mut catalog, &c[1])?;
            let project_id = unescape(&c[2]);
            return Ok(ns
                .metadata
                .get(&project_id)
                .map(|r| {
                    vec![json!({
                        "project_id": project_id,
                        "schema_version": r.schema_version,
                        "schema_hash": r.schema_hash,
                        "sync_status": r.sync_status,
                        "last_synced_at": r.last_synced_at,
                        "last_error": r.last_error,
                    })]
                })
                .unwrap_or_default());
        }

        if let Some(c) = p.delete_metadata.captures(sql) {
            let ns = metadata_namespace(&mut catalog, &c[1])?;
            ns.metadata.remove(&unescape(&c[2]));
            return Ok(vec![]);
        }

        if let Some(c) = p.constraint_catalog.captures(sql) {
            let mut rows = Vec::new();
            if let Some(ns) = catalog.namespaces.get(&c[1]) {
                for (table_name, table) in &ns.tables {
                    for k in &table.constraints {
                        if k.kind == ConstraintKind::ForeignKey {
                            continue;
                        }
                        rows.push(json!({
                            "table_name": table_name,
                            "column_name": k.column,
                            "constraint_type": k.kind.as_sql(),
                        }));
                    }
                }
            }
            return Ok(rows);
        }

        if let Some(c) = p.select_all.captures(sql) {
            table_mut(&mut catalog, &c[1], &c[2])?;
            return Ok(vec![]);
        }

        if sql == "SELECT 1" {
            return Ok(vec![json!({ "?column?": 1 })]);
        }

        Err(err(
            sqlstate::SYNTAX_ERROR,
            format!("unsupported statement: {}", sql),
        ))
    }
}

fn namespace_mut<'a>(catalog: &'a mut Catalog, name: &str) -> Result<&'a mut MemNamespace, ExecError> {
    catalog.namespaces.get_mut(name).ok_or_else(|| {
        err(
            sqlstate::INVALID_SCHEMA_NAME,
            format!("schema \"{}\" does not exist", name),
        )
    })
}

fn table_mut<'a>(catalog: &'a mut Catalog, namespace: &str, table: &str) -> Result<&'a mut MemTable, ExecError> {
    namespace_mut(catalog, namespace)?
        .tables
        .get_mut(table)
        .ok_or_else(|| {
            err(
                sqlstate::UNDEFINED_TABLE,
                format!("relation \"{}.{}\" does not exist", namespace, table),
            )
        })
}

fn metadata_namespace<'a>(catalog: &'a mut Catalog, namespace: &str) -> Result<&'a mut MemNamespace, ExecError> {
    let ns = namespace_mut(catalog, namespace)?;
    if !ns.tables.contains_key(METADATA_TABLE) {
        return Err(err(
            sqlstate::UNDEFINED_TABLE,
            format!("relation \"{}.{}\" does not exist", namespace, METADATA_TABLE),
        ));
    }
    Ok(ns)
}

fn inline_constraints(table_name: &str, column: &MemColumn) -> Vec<MemConstraint> {
    let mut constraints = Vec::new();
    if column.primary_key {
        constraints.push(MemConstraint {
            name: format!("{}_pkey", table_name),
            kind: ConstraintKind::PrimaryKey,
            column: column.name.clone(),
            references: None,
        });
    } else if column.unique {
        constraints.push(MemConstraint {
            name: format!("{}_{}_key", table_name, column.name),
            kind: ConstraintKind::Unique,
            column: column.name.clone(),
            references: None,
        });
    }
    constraints
}

fn create_table(catalog: &mut Catalog, c: &Captures<'_>) -> Result<Vec<Value>, ExecError> {
    let if_not_exists = c.get(1).is_some();
    let table_name = c[3].to_string();
    let ns = namespace_mut(catalog, &c[2])?;
    if ns.tables.contains_key(&table_name) {
        if if_not_exists {
            return Ok(vec![]);
        }
        return Err(err(
            sqlstate::DUPLICATE_TABLE,
            format!("relation \"{}\" already exists", table_name),
        ));
    }

    let mut table = MemTable::default();
    for clause in split_top_level(&c[4]) {
        let column = parse_column_clause(&clause)?;
        if table.column(&column.name).is_some() {
            return Err(err(
                sqlstate::DUPLICATE_COLUMN,
                format!("column \"{}\" specified more than once", column.name),
            ));
        }
        table.constraints.extend(inline_constraints(&table_name, &column));
        table.columns.push(column);
    }
    ns.tables.insert(table_name, table);
    Ok(vec![])
}

fn alter_table(catalog: &mut Catalog, namespace: &str, table_name: &str, action: &str) -> Result<Vec<Value>, ExecError> {
    let p = patterns();

    if let Some(c) = p.add_fk.captures(action) {
        let (constraint, column) = (c[1].to_string(), c[2].to_string());
        let (ref_ns, ref_table, ref_column) = (c[3].to_string(), c[4].to_string(), c[5].to_string());
        {
            let referenced = table_mut(catalog, &ref_ns, &ref_table)?;
            let key = referenced.column(&ref_column).ok_or_else(|| {
                err(
                    sqlstate::UNDEFINED_COLUMN,
                    format!("column \"{}\" referenced in foreign key constraint does not exist", ref_column),
                )
            })?;
            if !(key.primary_key || key.unique) {
                return Err(err(
                    sqlstate::INVALID_FOREIGN_KEY,
                    format!("there is no unique constraint matching given keys for referenced table \"{}\"", ref_table),
                ));
            }
        }
        let table = table_mut(catalog, namespace, table_name)?;
        ensure_column(table, table_name, &column)?;
        ensure_constraint_free(table, table_name, &constraint)?;
        table.constraints.push(MemConstraint {
            name: constraint,
            kind: ConstraintKind::ForeignKey,
            column,
            references: Some((ref_ns, ref_table)),
        });
        return Ok(vec![]);
    }

    let table = table_mut(catalog, namespace, table_name)?;

    if action == "ENABLE ROW LEVEL SECURITY" {
        table.rls_enabled = true;
        return Ok(vec![]);
    }

    if let Some(c) = p.add_column.captures(action) {
        let column = parse_column_clause(c[1].trim())?;
        if table.column(&column.name).is_some() {
            return Err(err(
                sqlstate::DUPLICATE_COLUMN,
                format!("column \"{}\" of relation \"{}\" already exists", column.name, table_name),
            ));
        }
        table.constraints.extend(inline_constraints(table_name, &column));
        table.columns.push(column);
        return Ok(vec![]);
    }

    if let Some(c) = p.drop_column.captures(action) {
        let name = c[1].to_string();
        ensure_column(table, table_name, &name)?;
        table.columns.retain(|col| col.name != name);
        table.constraints.retain(|k| k.column != name);
        return Ok(vec![]);
    }

    if let Some(c) = p.rename_column.captures(action) {
        let (from, to) = (c[1].to_string(), c[2].to_string());
        ensure_column(table, table_name, &from)?;
        if table.column(&to).is_some() {
            return Err(err(
                sqlstate::DUPLICATE_COLUMN,
                format!("column \"{}\" of relation \"{}\" already exists", to, table_name),
            ));
        }
        for col in table.columns.iter_mut().filter(|col| col.name == from) {
            col.name = to.clone();
        }
        for k in table.constraints.iter_mut().filter(|k| k.column == from) {
            k.column = to.clone();
        }
        return Ok(vec![]);
    }

    if let Some(c) = p.alter_type.captures(action) {
        let name = c[1].to_string();
        ensure_column(table, table_name, &name)?;
        for col in table.columns.iter_mut().filter(|col| col.name == name) {
            col.sql_type = c[2].trim().to_string();
        }
        return Ok(vec![]);
    }

    if let Some(c) = p.add_unique.captures(action) {
        let (constraint, column) = (c[1].to_string(), c[2].to_string());
        ensure_column(table, table_name, &column)?;
        ensure_constraint_free(table, table_name, &constraint)?;
        table.constraints.push(MemConstraint {
            name: constraint,
            kind: ConstraintKind::Unique,
            column,
            references: None,
        });
        return Ok(vec![]);
    }

    if let Some(c) = p.drop_constraint.captures(action) {
        let name = c[1].to_string();
        if !table.constraints.iter().any(|k| k.name == name) {
            return Err(err(
                sqlstate::UNDEFINED_OBJECT,
                format!("constraint \"{}\" of relation \"{}\" does not exist", name, table_name),
            ));
        }
        table.constraints.retain(|k| k.name != name);
        return Ok(vec![]);
    }

    Err(err(
        sqlstate::SYNTAX_ERROR,
        format!("unsupported ALTER TABLE action: {}", action),
    ))
}

fn ensure_column(table: &MemTable, table_name: &str, column: &str) -> Result<(), ExecError> {
    if table.column(column).is_none() {
        return Err(err(
            sqlstate::UNDEFINED_COLUMN,
            format!("column \"{}\" of relation \"{}\" does not exist", column, table_name),
        ));
    }
    Ok(())
}

fn ensure_constraint_free(table: &MemTable, table_name: &str, constraint: &str) -> Result<(), ExecError> {
    if table.constraints.iter().any(|k| k.name == constraint) {
        return Err(err(
            sqlstate::DUPLICATE_OBJECT,
            format!("constraint \"{}\" for relation \"{}\" already exists", constraint, table_name),
        ));
    }
    Ok(())
}

fn is_ddl(sql: &str) -> bool {
    ["CREATE ", "ALTER ", "DROP "]
        .iter()
        .any(|prefix| sql.starts_with(prefix))
}

#[async_trait]
impl SqlExecutor for MemoryCluster {
    async fn execute(&self, sql: &str) -> Result<Vec<Value>, ExecError> {
        let sql = sql.trim().trim_end_matches(';').trim();
        self.log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(sql.to_string());
        debug!(endpoint = %self.endpoint, sql, "memory cluster execute");

        if self.deny_ddl.load(Ordering::SeqCst) && is_ddl(sql) {
            return Err(err(
                sqlstate::INSUFFICIENT_PRIVILEGE,
                "permission denied for database".to_string(),
            ));
        }
        let injected = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, e)| e.clone());
        if let Some(e) = injected {
            return Err(e);
        }

        self.run(sql)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
