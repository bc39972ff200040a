use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use schemasync::audit::StoreAuditLog;
use schemasync::config::{load_config, SyncConfig};
use schemasync::ddl::{DdlGenerator, PolicyMode};
use schemasync::engine::change::plan_change;
use schemasync::engine::{ChangeApplier, ChangeRequest, Reconciler, SchemaChange, SyncContext};
use schemasync::output::formatter;
use schemasync::schema::{compute_hash, hash_prefix, SchemaDesign};
use schemasync::state::models::{DeploymentConfig, DeploymentStrategy, Project};
use schemasync::state::{MasterStore, SqliteMaster};

/// schemasync - Materialize versioned logical schemas as tenant-scoped tables
#[derive(Parser)]
#[command(name = "schemasync", version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "schemasync.yaml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the Master database
    Init,

    /// Manage organizations
    Org {
        #[command(subcommand)]
        command: OrgCommands,
    },

    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Apply a single schema change (JSON change request)
    Apply {
        /// Path to the change request file
        file: String,
    },

    /// Show the statements a change would run, without running them
    Plan {
        /// Path to the change request file
        file: String,
    },

    /// Materialize a project's whole design on its cluster
    ApplySchema {
        organization: String,
        project: String,

        /// Embed the organization id in row policies instead of the accessor
        #[arg(long)]
        literal_policies: bool,
    },

    /// Compare the Master version with the Slave's recorded version
    Verify { organization: String, project: String },

    /// Detect drift and optionally repair it
    Reconcile {
        organization: String,
        project: String,

        /// Replay missed changes, or materialize an uninitialized project
        #[arg(long)]
        repair: bool,
    },

    /// Find unique and primary-key columns without a backing constraint
    Constraints {
        organization: String,
        project: String,

        /// Add the missing UNIQUE constraints
        #[arg(long)]
        repair: bool,
    },

    /// Show a project's schema change log
    Log {
        project: String,

        /// Only applied changes that produced a version above this one
        #[arg(long)]
        since: Option<i64>,
    },

    /// Print the content hash of a schema design file
    Hash {
        /// Path to a schema design (JSON)
        file: String,
    },

    /// Validate configuration without running anything
    Validate,
}

#[derive(Subcommand)]
enum OrgCommands {
    /// Create or rename an organization
    Create {
        id: String,

        #[arg(long)]
        name: Option<String>,

        /// Register a dedicated cluster endpoint for this organization
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Show an organization
    Show { id: String },
    /// List organizations
    List,
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project at version 1
    Create {
        organization: String,
        id: String,

        #[arg(long)]
        name: Option<String>,

        /// Initial schema design (JSON); empty when omitted
        #[arg(long)]
        schema: Option<String>,
    },
    /// Show a project and its design
    Show { id: String },
    /// List an organization's projects
    List { organization: String },
    /// Drop a project's tables and remove it from the Master
    Delete { organization: String, id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init(&cli).await,
        Commands::Org { ref command } => cmd_org(&cli, command).await,
        Commands::Project { ref command } => cmd_project(&cli, command).await,
        Commands::Apply { ref file } => cmd_apply(&cli, file).await,
        Commands::Plan { ref file } => cmd_plan(&cli, file).await,
        Commands::ApplySchema {
            ref organization,
            ref project,
            literal_policies,
        } => cmd_apply_schema(&cli, organization, project, literal_policies).await,
        Commands::Verify {
            ref organization,
            ref project,
        } => cmd_verify(&cli, organization, project).await,
        Commands::Reconcile {
            ref organization,
            ref project,
            repair,
        } => cmd_reconcile(&cli, organization, project, repair).await,
        Commands::Constraints {
            ref organization,
            ref project,
            repair,
        } => cmd_constraints(&cli, organization, project, repair).await,
        Commands::Log { ref project, since } => cmd_log(&cli, project, since).await,
        Commands::Hash { ref file } => cmd_hash(&cli, file),
        Commands::Validate => cmd_validate(&cli),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn open_master(config: &SyncConfig) -> Result<Arc<dyn MasterStore>> {
    if let Some(parent) = Path::new(&config.master.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = SqliteMaster::open(&config.master.path)?;
    store.initialize().await?;
    Ok(Arc::new(store))
}

async fn open_context(cli: &Cli) -> Result<Arc<SyncContext>> {
    let config = load_config(&cli.config)?;
    let store = open_master(&config).await?;
    let audit = Arc::new(StoreAuditLog::new(Arc::clone(&store)));
    Ok(Arc::new(SyncContext::new(
        store,
        Arc::new(config.cluster_pool()),
        audit,
        config.naming_resolver(),
        config.engine_settings(),
    )))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path))
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_init(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    open_master(&config).await?;
    formatter::print_success(&format!(
        "Master initialized at {}.",
        config.master.path
    ));
    Ok(())
}

async fn cmd_org(cli: &Cli, command: &OrgCommands) -> Result<()> {
    let config = load_config(&cli.config)?;
    let store = open_master(&config).await?;

    match command {
        OrgCommands::Create { id, name, endpoint } => {
            let org = store
                .upsert_organization(id, name.as_deref().unwrap_or(id))
                .await?;

            if let Some(endpoint) = endpoint {
                if !config.clusters.contains_key(endpoint) {
                    bail!("Endpoint '{}' is not declared under 'clusters'", endpoint);
                }
                let deployment = DeploymentConfig {
                    organization_id: org.id.clone(),
                    strategy: DeploymentStrategy::Dedicated,
                    endpoint: endpoint.clone(),
                    namespace: config.naming_resolver().namespace_name(&org.id),
                };
                store.upsert_deployment_config(&deployment).await?;
                println!(
                    "  {} dedicated endpoint {} ({})",
                    "+".green(),
                    deployment.endpoint.bold(),
                    deployment.namespace
                );
            }

            if cli.json {
                formatter::print_json(&org)?;
            } else {
                formatter::print_success(&format!("Organization {} saved.", org.id));
            }
        }

        OrgCommands::Show { id } => {
            let org = store
                .get_organization(id)
                .await?
                .with_context(|| format!("Organization '{}' not found.", id))?;
            if cli.json {
                formatter::print_json(&org)?;
            } else {
                formatter::print_organization(&org);
            }
        }

        OrgCommands::List => {
            let orgs = store.list_organizations().await?;
            if cli.json {
                formatter::print_json(&orgs)?;
            } else if orgs.is_empty() {
                println!("{}", "No organizations.".dimmed());
            } else {
                for org in &orgs {
                    println!("  {:<40} {}", org.id, org.name.dimmed());
                }
            }
        }
    }
    Ok(())
}

async fn cmd_project(cli: &Cli, command: &ProjectCommands) -> Result<()> {
    match command {
        ProjectCommands::Create {
            organization,
            id,
            name,
            schema,
        } => {
            let config = load_config(&cli.config)?;
            let store = open_master(&config).await?;
            if store.get_organization(organization).await?.is_none() {
                bail!("Organization '{}' not found. Run 'schemasync org create' first.", organization);
            }
            let design: SchemaDesign = match schema {
                Some(path) => read_json(path)?,
                None => SchemaDesign::default(),
            };
            let project = Project::new(id, organization, name.as_deref().unwrap_or(id), design);
            store.create_project(&project).await?;
            if cli.json {
                formatter::print_json(&project)?;
            } else {
                formatter::print_success(&format!(
                    "Project {} created at version {} (hash {}).",
                    project.id,
                    project.version,
                    hash_prefix(&project.schema_hash)
                ));
            }
        }

        ProjectCommands::Show { id } => {
            let config = load_config(&cli.config)?;
            let store = open_master(&config).await?;
            let project = store
                .get_project(id)
                .await?
                .with_context(|| format!("Project '{}' not found.", id))?;
            if cli.json {
                formatter::print_json(&project)?;
            } else {
                formatter::print_project(&project);
            }
        }

        ProjectCommands::List { organization } => {
            let config = load_config(&cli.config)?;
            let store = open_master(&config).await?;
            let projects = store.list_projects(organization).await?;
            if cli.json {
                formatter::print_json(&projects)?;
            } else if projects.is_empty() {
                println!("{}", "No projects.".dimmed());
            } else {
                for p in &projects {
                    println!("  {:<40} v{:<5} {}", p.id, p.version, p.status);
                }
            }
        }

        ProjectCommands::Delete { organization, id } => {
            let ctx = open_context(cli).await?;
            let result = ChangeApplier::new(ctx).delete_project(organization, id).await?;
            if cli.json {
                formatter::print_json(&result)?;
            } else {
                formatter::print_delete_result(id, &result);
            }
        }
    }
    Ok(())
}

async fn cmd_apply(cli: &Cli, file: &str) -> Result<()> {
    let request: ChangeRequest = read_json(file)?;
    let ctx = open_context(cli).await?;
    let result = ChangeApplier::new(ctx).apply(&request).await?;

    if cli.json {
        formatter::print_json(&result)?;
    } else {
        formatter::print_apply_result(&result);
    }
    if !result.success {
        bail!("Change was not applied.");
    }
    Ok(())
}

async fn cmd_plan(cli: &Cli, file: &str) -> Result<()> {
    let request: ChangeRequest = read_json(file)?;
    let ctx = open_context(cli).await?;
    let project = ctx
        .load_project(&request.organization_id, &request.project_id)
        .await?;

    let change = SchemaChange::try_from(&request.change)?;
    let ddl = DdlGenerator::new(&ctx.naming.namespace_name(&request.organization_id))?;
    let plan = plan_change(&change, &project.schema, &ctx.naming, &ddl)?;

    if cli.json {
        let statements: Vec<String> = plan.statements.iter().map(|s| s.to_string()).collect();
        formatter::print_json(&statements)?;
        return Ok(());
    }
    if plan.statements.is_empty() {
        println!("{}", "No statements. The change is a no-op.".green());
        return Ok(());
    }
    for stmt in &plan.statements {
        println!("{};", stmt);
    }
    Ok(())
}

async fn cmd_apply_schema(
    cli: &Cli,
    organization: &str,
    project: &str,
    literal_policies: bool,
) -> Result<()> {
    let ctx = open_context(cli).await?;
    let mode = if literal_policies {
        PolicyMode::Literal(organization.to_string())
    } else {
        PolicyMode::Accessor
    };
    let result = ChangeApplier::new(ctx)
        .apply_schema(organization, project, &mode)
        .await?;

    if cli.json {
        formatter::print_json(&result)?;
    } else {
        formatter::print_schema_apply(&result);
    }
    if !result.success {
        bail!("Schema apply incomplete.");
    }
    Ok(())
}

async fn cmd_verify(cli: &Cli, organization: &str, project: &str) -> Result<()> {
    let ctx = open_context(cli).await?;
    let verification = Reconciler::new(ctx).verify(organization, project).await?;
    if cli.json {
        formatter::print_json(&verification)?;
    } else {
        formatter::print_verification(&verification);
    }
    Ok(())
}

async fn cmd_reconcile(cli: &Cli, organization: &str, project: &str, repair: bool) -> Result<()> {
    let ctx = open_context(cli).await?;
    let report = Reconciler::new(ctx)
        .reconcile(organization, project, repair)
        .await?;
    if cli.json {
        formatter::print_json(&report)?;
    } else {
        formatter::print_reconcile_report(&report);
    }
    if let Some(ref err) = report.error {
        bail!("Reconciliation failed: {}", err);
    }
    Ok(())
}

async fn cmd_constraints(cli: &Cli, organization: &str, project: &str, repair: bool) -> Result<()> {
    let ctx = open_context(cli).await?;
    let reconciler = Reconciler::new(ctx);

    if repair {
        let result = reconciler.repair_constraints(organization, project).await?;
        if cli.json {
            formatter::print_json(&result)?;
        } else {
            formatter::print_constraint_repair(&result);
        }
        if !result.failed.is_empty() {
            bail!("{} constraint(s) could not be added.", result.failed.len());
        }
    } else {
        let missing = reconciler.audit_constraints(organization, project).await?;
        if cli.json {
            formatter::print_json(&missing)?;
        } else {
            formatter::print_missing_constraints(&missing);
        }
    }
    Ok(())
}

async fn cmd_log(cli: &Cli, project: &str, since: Option<i64>) -> Result<()> {
    let config = load_config(&cli.config)?;
    let store = open_master(&config).await?;
    let records = match since {
        Some(version) => store.applied_changes_since(project, version).await?,
        None => store.list_changes(project).await?,
    };
    if cli.json {
        formatter::print_json(&records)?;
    } else {
        formatter::print_change_log(&records);
    }
    Ok(())
}

fn cmd_hash(cli: &Cli, file: &str) -> Result<()> {
    let design: SchemaDesign = read_json(file)?;
    let hash = compute_hash(&design);
    if cli.json {
        formatter::print_json(&serde_json::json!({
            "hash": hash,
            "prefix": hash_prefix(&hash),
        }))?;
    } else {
        println!("{}", hash);
    }
    Ok(())
}

fn cmd_validate(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    formatter::print_success(&format!(
        "Configuration valid: {} cluster endpoint(s), default '{}'.",
        config.clusters.len(),
        config.deployment.default_endpoint
    ));
    Ok(())
}
