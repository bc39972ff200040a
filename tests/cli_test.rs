//! CLI tests. Each `schemasync` invocation is a separate process, so
//! `memory://` cluster state does not carry over between commands; the
//! Master database in the temp dir does.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const SCHEMA: &str = r#"{
  "tables": [
    {
      "id": "t1",
      "name": "users",
      "columns": [
        { "name": "id", "type": "uuid", "isPrimaryKey": true, "isNullable": false },
        { "name": "email", "type": "text", "isUnique": true, "isNullable": false }
      ]
    }
  ],
  "relationships": []
}"#;

const ADD_ORDERS: &str = r#"{
  "organization_id": "acme-corp",
  "project_id": "p1",
  "created_by": "cli-test",
  "change": {
    "type": "add_table",
    "table": "t2",
    "table_def": {
      "id": "t2",
      "name": "orders",
      "columns": [
        { "name": "id", "type": "uuid", "isPrimaryKey": true, "isNullable": false },
        { "name": "total", "type": "integer" }
      ]
    }
  }
}"#;

const ADD_AGE: &str = r#"{
  "organization_id": "acme-corp",
  "project_id": "p1",
  "change": {
    "type": "add_column",
    "table": "t1",
    "column_def": { "name": "age", "type": "INTEGER" }
  }
}"#;

const ADD_TO_MISSING: &str = r#"{
  "organization_id": "acme-corp",
  "project_id": "p1",
  "change": {
    "type": "add_column",
    "table": "t404",
    "column_def": { "name": "age", "type": "INTEGER" }
  }
}"#;

/// Temp dir with a config pointing the Master at a file inside it.
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let master = dir.path().join("state").join("master.db");
    let config = format!(
        "master:\n  path: \"{}\"\nclusters:\n  primary: \"memory://\"\n",
        master.display()
    );
    std::fs::write(dir.path().join("schemasync.yaml"), config).unwrap();
    std::fs::write(dir.path().join("schema.json"), SCHEMA).unwrap();
    std::fs::write(dir.path().join("add_orders.json"), ADD_ORDERS).unwrap();
    std::fs::write(dir.path().join("add_age.json"), ADD_AGE).unwrap();
    std::fs::write(dir.path().join("add_missing.json"), ADD_TO_MISSING).unwrap();
    dir
}

fn schemasync(dir: &Path) -> Command {
    let mut cmd = assert_cmd::cargo_bin_cmd!("schemasync");
    cmd.current_dir(dir)
        .arg("-c")
        .arg(dir.join("schemasync.yaml"))
        .env("NO_COLOR", "1");
    cmd
}

/// init + org + project, shared by the flow tests.
fn bootstrap(dir: &Path) {
    schemasync(dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Master initialized"));
    schemasync(dir)
        .args(["org", "create", "acme-corp", "--name", "Acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Organization acme-corp saved"));
    schemasync(dir)
        .args(["project", "create", "acme-corp", "p1", "--schema", "schema.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created at version 1"));
}

#[test]
fn test_validate() {
    let dir = workspace();
    schemasync(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration valid"));
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let mut cmd = assert_cmd::cargo_bin_cmd!("schemasync");
    cmd.current_dir(dir.path())
        .args(["-c", "nowhere.yaml", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config not found"));
}

#[test]
fn test_hash_is_stable() {
    let dir = workspace();
    let first = schemasync(dir.path())
        .args(["hash", "schema.json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let hash = String::from_utf8(first).unwrap();
    assert_eq!(hash.trim().len(), 64);

    schemasync(dir.path())
        .args(["hash", "schema.json"])
        .assert()
        .success()
        .stdout(predicate::str::diff(hash));
}

#[test]
fn test_apply_and_log() {
    let dir = workspace();
    bootstrap(dir.path());

    schemasync(dir.path())
        .args(["apply", "add_orders.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("version 2"))
        .stdout(predicate::str::contains("CREATE TABLE org_acmecorp.t_t2"));

    schemasync(dir.path())
        .args(["project", "show", "p1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("t_t2"))
        .stdout(predicate::str::contains("Version:"));

    schemasync(dir.path())
        .args(["log", "p1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("add_table"))
        .stdout(predicate::str::contains("applied"));

    schemasync(dir.path())
        .args(["log", "p1", "--since", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes recorded"));
}

#[test]
fn test_plan_prints_statements() {
    let dir = workspace();
    bootstrap(dir.path());

    schemasync(dir.path())
        .args(["plan", "add_age.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "ALTER TABLE org_acmecorp.t_t1 ADD COLUMN age INTEGER;",
        ));
}

#[test]
fn test_unknown_table_fails() {
    let dir = workspace();
    bootstrap(dir.path());

    schemasync(dir.path())
        .args(["apply", "add_missing.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown table 't404'"));
}

#[test]
fn test_verify_and_reconcile() {
    let dir = workspace();
    bootstrap(dir.path());

    schemasync(dir.path())
        .args(["verify", "acme-corp", "p1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not_initialized"));

    schemasync(dir.path())
        .args(["reconcile", "acme-corp", "p1", "--repair"])
        .assert()
        .success()
        .stdout(predicate::str::contains("t_t1"))
        .stdout(predicate::str::contains("Master and Slave are in sync"));
}

#[test]
fn test_verify_json() {
    let dir = workspace();
    bootstrap(dir.path());

    let output = schemasync(dir.path())
        .args(["--json", "verify", "acme-corp", "p1"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["state"], "not_initialized");
    assert_eq!(value["master"]["version"], 1);
    assert_eq!(value["synced"], false);
}
