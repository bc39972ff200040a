/// SQL DDL for the Master store.
///
/// Designs and change statements are stored as JSON text; timestamps are
/// RFC 3339 text.

pub const SCHEMA_VERSION: i32 = 2;

pub const CREATE_TABLES_SQL: &str = "
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT
);

-- Tenant organizations
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Which cluster endpoint and namespace serve an organization
CREATE TABLE IF NOT EXISTS deployment_configs (
    organization_id TEXT PRIMARY KEY,
    strategy TEXT NOT NULL DEFAULT 'shared',
    endpoint TEXT NOT NULL,
    namespace TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (organization_id) REFERENCES organizations(id) ON DELETE CASCADE
);

-- Logical schema designs, versioned per project
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    name TEXT NOT NULL,
    schema_json TEXT NOT NULL DEFAULT '{}',
    version INTEGER NOT NULL DEFAULT 1,
    schema_hash TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (organization_id) REFERENCES organizations(id) ON DELETE CASCADE
);

-- Append-only schema change log
CREATE TABLE IF NOT EXISTS schema_changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    project_id TEXT NOT NULL,
    organization_id TEXT NOT NULL,
    change_type TEXT NOT NULL,
    change_data TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL,
    statements TEXT NOT NULL DEFAULT '[]',
    error_message TEXT,
    version INTEGER,
    schema_hash TEXT,
    applied_at TEXT,
    created_by TEXT,
    created_at TEXT NOT NULL
);
";

pub const CREATE_INDEXES_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_projects_org ON projects(organization_id);
CREATE INDEX IF NOT EXISTS idx_changes_project ON schema_changes(project_id);
CREATE INDEX IF NOT EXISTS idx_changes_version ON schema_changes(project_id, version);
";

/// Version 2: change statements move from a joined script to a JSON array.
/// Legacy scripts are kept whole as a single entry.
pub const MIGRATE_V2_SQL: &str = "
ALTER TABLE schema_changes ADD COLUMN statements TEXT NOT NULL DEFAULT '[]';
UPDATE schema_changes SET statements = json_array(sql) WHERE sql <> '';
";
