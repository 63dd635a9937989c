//! # waypoint
//!
//! Command-line interface for Waypoint.
//!
//! - `waypoint batch submit/status/run/resume/abort` — drive a batch of work items
//! - `waypoint stage start/complete/fail/status` — record stage events for a run
//! - `waypoint hook pre-tool-use` — answer a host's tool-call authorization request
//! - `waypoint consent list/approve/deny/reset` — manage cached approvals and lockouts
//! - `waypoint audit verify/tail` — inspect the hash-chained audit log
//! - `waypoint policy check/init` — inspect or create the security policy

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wp_config::WaypointConfig;

/// Waypoint — staged, checkpointed, authorized agent pipelines.
#[derive(Parser)]
#[command(name = "waypoint", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit, run, and resume batches.
    Batch {
        #[command(subcommand)]
        command: commands::batch::BatchCommands,
    },
    /// Record stage events for a pipeline run.
    Stage {
        #[command(subcommand)]
        command: commands::stage::StageCommands,
    },
    /// Host hook entry points.
    Hook {
        #[command(subcommand)]
        command: commands::hook::HookCommands,
    },
    /// Manage consent decisions and circuit breakers.
    Consent {
        #[command(subcommand)]
        command: commands::consent::ConsentCommands,
    },
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
    /// Inspect the security policy.
    Policy {
        #[command(subcommand)]
        command: commands::policy::PolicyCommands,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is reserved for hook verdicts and reports.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("waypoint=info,wp_batch=info,wp_authz=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let config = WaypointConfig::load(&project_root)?;

    match &cli.command {
        Commands::Batch { command } => commands::batch::execute(command, &config),
        Commands::Stage { command } => commands::stage::execute(command, &config),
        Commands::Hook { command } => {
            let code = commands::hook::execute(command, &config)?;
            std::process::exit(code);
        }
        Commands::Consent { command } => commands::consent::execute(command, &config),
        Commands::Audit { command } => commands::audit::execute(command, &config),
        Commands::Policy { command } => commands::policy::execute(command, &config),
    }
}
