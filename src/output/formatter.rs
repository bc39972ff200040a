use colored::Colorize;

use crate::engine::{
    ApplyResult, ConstraintRepair, DeleteResult, MissingConstraint, PolicyFailure,
    ReconcileReport, SchemaApplyResult, SyncState, SyncVerification,
};
use crate::state::models::{ChangeRecord, ChangeStatus, Organization, Project, ProjectStatus};

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn print_error(msg: &str) {
    println!("{} {}", "✗".red().bold(), msg.red());
}

/// Print any serializable result as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print DDL statements, one per line, dimmed.
fn print_sql(statements: &[String]) {
    for stmt in statements {
        println!("    {}", format!("{};", stmt).dimmed());
    }
}

fn print_policy_errors(indent: &str, failures: &[PolicyFailure]) {
    for failure in failures {
        println!("{}{} {}", indent, "!".yellow().bold(), failure.sql.dimmed());
        println!("{}  {}", indent, failure.error.yellow());
    }
}

// ─── Single Change ──────────────────────────────────────────────────────────

pub fn print_apply_result(result: &ApplyResult) {
    println!();
    if result.success && result.already_exists {
        print_success("Table already exists, nothing to apply.");
    } else if result.success {
        match result.version {
            Some(v) => print_success(&format!("Change applied. Project is now at version {}.", v)),
            None => print_success("Change applied."),
        }
    } else {
        print_error(&format!(
            "Change failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }

    if let Some(ref name) = result.internal_name {
        println!("  {:<14} {}", "Table:".bold(), name);
    }
    if let Some(ref at) = result.applied_at {
        println!("  {:<14} {}", "Applied at:".bold(), at);
    }
    if !result.sql.is_empty() {
        println!("  {}", "SQL:".bold());
        print_sql(&result.sql);
    }
    if !result.policy_errors.is_empty() {
        println!("  {}", "Access policies not created:".bold().yellow());
        print_policy_errors("    ", &result.policy_errors);
    }
    println!();
}

// ─── Bulk Apply ─────────────────────────────────────────────────────────────

pub fn print_schema_apply(result: &SchemaApplyResult) {
    println!();
    println!("{}", "Tables".bold().cyan());
    println!("{}", "─".repeat(80));
    println!(
        "  {:<30} {:<38} {}",
        "TABLE".bold(),
        "INTERNAL NAME".bold(),
        "STATUS".bold()
    );
    println!("{}", "─".repeat(80));

    for table in &result.tables {
        let status = if !table.success {
            "failed".red().to_string()
        } else if table.already_exists {
            "exists".dimmed().to_string()
        } else {
            "created".green().to_string()
        };
        println!("  {:<30} {:<38} {}", table.table_name, table.internal_name, status);
        if let Some(ref err) = table.error {
            println!("      {}", err.red());
        }
        print_policy_errors("      ", &table.policy_errors);
    }

    if !result.foreign_keys.is_empty() {
        println!();
        println!("{}", "Foreign keys".bold().cyan());
        for fk in &result.foreign_keys {
            let icon = if fk.success { "+".green() } else { "✗".red() };
            println!("  {} {}", icon, fk.relationship_id);
            if let Some(ref err) = fk.error {
                println!("      {}", err.red());
            }
        }
    }

    println!();
    let failed = result.failed_tables().count();
    if result.success {
        print_success(&format!(
            "Schema applied: {} table(s) at version {}.",
            result.tables.len(),
            result.version
        ));
    } else {
        print_error(&format!(
            "Schema apply incomplete: {} of {} table(s) failed.",
            failed,
            result.tables.len()
        ));
    }
    println!();
}

pub fn print_delete_result(project_id: &str, result: &DeleteResult) {
    println!();
    for table in &result.dropped {
        println!("  {} {}", "-".red().bold(), table);
    }
    print_success(&format!(
        "Project {} deleted ({} table(s) dropped).",
        project_id,
        result.dropped.len()
    ));
    println!();
}

// ─── Drift ──────────────────────────────────────────────────────────────────

fn state_colored(state: &SyncState) -> String {
    let label = state.to_string();
    match state {
        SyncState::InSync => label.green().to_string(),
        SyncState::BehindBy(_) | SyncState::NotInitialized => label.yellow().to_string(),
        SyncState::SlaveAhead | SyncState::HashMismatch => label.red().to_string(),
    }
}

pub fn print_verification(v: &SyncVerification) {
    println!();
    println!("{} {}", "Sync state:".bold().cyan(), state_colored(&v.state));
    println!("{}", "─".repeat(60));
    println!(
        "  {:<10} version {:<6} hash {}",
        "Master".bold(),
        v.master.version,
        v.master.hash_prefix
    );
    match (v.slave.version, v.slave.hash_prefix.as_deref()) {
        (Some(version), Some(hash)) => {
            println!("  {:<10} version {:<6} hash {}", "Slave".bold(), version, hash);
            if let Some(ref status) = v.slave.status {
                println!("  {:<10} {}", "", status.dimmed());
            }
            if let Some(ref at) = v.slave.last_synced {
                println!("  {:<10} last synced {}", "", at.dimmed());
            }
        }
        _ => println!("  {:<10} {}", "Slave".bold(), "no metadata".dimmed()),
    }
    println!("{}", "─".repeat(60));
    if v.needs_reconciliation {
        println!(
            "  {}",
            "Reconciliation needed. Run `schemasync reconcile --repair`.".yellow()
        );
    }
    println!();
}

pub fn print_reconcile_report(report: &ReconcileReport) {
    print_verification(&report.before);

    if !report.replayed.is_empty() {
        let versions: Vec<String> = report.replayed.iter().map(|v| v.to_string()).collect();
        println!("  {} replayed version(s) {}", "~".yellow().bold(), versions.join(", "));
    }
    if let Some(ref applied) = report.materialized {
        println!("  {} materialized schema from the Master design", "+".green().bold());
        print_schema_apply(applied);
    }
    if let Some(ref err) = report.error {
        print_error(err);
    }

    if report.after.synced {
        print_success("Master and Slave are in sync.");
    } else {
        println!("  {} {}", "Still:".bold(), state_colored(&report.after.state));
    }
    println!();
}

pub fn print_missing_constraints(missing: &[MissingConstraint]) {
    println!();
    if missing.is_empty() {
        print_success("All unique and primary-key columns are backed by constraints.");
        println!();
        return;
    }
    println!("{}", "Missing constraints".bold().yellow());
    println!("{}", "─".repeat(80));
    for m in missing {
        println!(
            "  {:<28} {:<38} {}",
            m.table_name,
            m.internal_name.dimmed(),
            m.column.bold()
        );
    }
    println!("{}", "─".repeat(80));
    println!("  {} column(s) need a UNIQUE constraint.", missing.len());
    println!();
}

pub fn print_constraint_repair(repair: &ConstraintRepair) {
    println!();
    for m in &repair.repaired {
        println!("  {} {}.{}", "+".green().bold(), m.internal_name, m.column);
    }
    for (m, err) in &repair.failed {
        println!("  {} {}.{}: {}", "✗".red().bold(), m.internal_name, m.column, err.red());
    }
    if repair.failed.is_empty() {
        print_success(&format!("{} constraint(s) repaired.", repair.repaired.len()));
    } else {
        print_error(&format!(
            "{} repaired, {} failed.",
            repair.repaired.len(),
            repair.failed.len()
        ));
    }
    println!();
}

// ─── Master Records ─────────────────────────────────────────────────────────

pub fn print_organization(org: &Organization) {
    println!();
    println!("{} {}", "Organization:".bold().cyan(), org.id.bold());
    println!("  {:<10} {}", "Name:".bold(), org.name);
    println!("  {:<10} {}", "Created:".bold(), org.created_at);
    println!();
}

pub fn print_project(project: &Project) {
    let status = match project.status {
        ProjectStatus::Applied => project.status.as_str().green().to_string(),
        ProjectStatus::Failed => project.status.as_str().red().to_string(),
        ProjectStatus::Applying => project.status.as_str().yellow().to_string(),
        ProjectStatus::Active => project.status.as_str().to_string(),
    };

    println!();
    println!("{} {}", "Project:".bold().cyan(), project.id.bold());
    println!("{}", "─".repeat(60));
    println!("  {:<16} {}", "Name:".bold(), project.name);
    println!("  {:<16} {}", "Organization:".bold(), project.organization_id);
    println!("  {:<16} {}", "Version:".bold(), project.version);
    println!("  {:<16} {}", "Hash:".bold(), project.schema_hash);
    println!("  {:<16} {}", "Status:".bold(), status);
    println!("  {:<16} {}", "Updated:".bold(), project.updated_at);

    if !project.schema.tables.is_empty() {
        println!();
        println!("  {}:", "Tables".bold());
        for table in &project.schema.tables {
            let internal = table.internal_name.as_deref().unwrap_or("(unresolved)");
            println!(
                "    {:<28} {:<38} {} column(s)",
                table.name,
                internal.dimmed(),
                table.columns.len()
            );
        }
    }
    println!("{}", "─".repeat(60));
    println!();
}

pub fn print_change_log(records: &[ChangeRecord]) {
    if records.is_empty() {
        println!("{}", "No changes recorded.".dimmed());
        return;
    }

    println!();
    println!(
        "  {:<8} {:<20} {:<10} {:<14} {}",
        "VERSION".bold(),
        "TYPE".bold(),
        "STATUS".bold(),
        "HASH".bold(),
        "AT".bold()
    );
    println!("{}", "─".repeat(90));
    for record in records {
        let version = record
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = match record.status {
            ChangeStatus::Applied => record.status.as_str().green().to_string(),
            ChangeStatus::Failed => record.status.as_str().red().to_string(),
            ChangeStatus::Pending => record.status.as_str().dimmed().to_string(),
        };
        let hash = record
            .schema_hash
            .as_deref()
            .map(crate::schema::hash_prefix)
            .unwrap_or_default();
        println!(
            "  {:<8} {:<20} {:<10} {:<14} {}",
            version,
            record.change_type,
            status,
            hash,
            record.applied_at.as_deref().unwrap_or(&record.created_at)
        );
        if let Some(ref err) = record.error_message {
            println!("      {}", err.red());
        }
    }
    println!();
    println!("  {} change(s) total.", records.len());
    println!();
}
