// batch.rs — Batch subcommands: submit, status, run, resume, abort.

use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use clap::Subcommand;
use wp_authz::{AuthorizationPipeline, DeferredPrompt};
use wp_batch::{
    BatchCoordinator, BatchError, BatchState, CheckpointManager, StageContext, StageExecutor,
    StageFailure, WorkItem,
};
use wp_config::WaypointConfig;
use wp_pipeline::StageTracker;
use wp_policy::ToolAction;

#[derive(Subcommand)]
pub enum BatchCommands {
    /// Submit a new batch of work items.
    Submit {
        /// Work item descriptions, in order.
        items: Vec<String>,
        /// Read descriptions from a file, one per line.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Batch id (defaults to a timestamped id).
        #[arg(long)]
        id: Option<String>,
    },
    /// Show the saved progress of a batch.
    Status {
        /// Batch id.
        id: String,
    },
    /// Run a batch, invoking a shell command once per stage.
    ///
    /// The command sees WAYPOINT_BATCH_ID, WAYPOINT_ITEM_INDEX,
    /// WAYPOINT_ITEM, WAYPOINT_STAGE and WAYPOINT_RUN_ID in its environment.
    /// Exit 0 completes the stage; any other exit fails it; a command killed
    /// by a signal interrupts the batch.
    Run {
        /// Batch id.
        id: String,
        /// Shell command to run for every stage.
        #[arg(long)]
        command: String,
    },
    /// Report where an interrupted batch will pick up.
    Resume {
        /// Batch id.
        id: String,
    },
    /// Stop a batch for good.
    Abort {
        /// Batch id.
        id: String,
        /// Why the batch is being stopped.
        #[arg(long, default_value = "aborted by user")]
        reason: String,
    },
}

pub fn execute(cmd: &BatchCommands, config: &WaypointConfig) -> anyhow::Result<()> {
    match cmd {
        BatchCommands::Submit { items, file, id } => submit(config, items, file.as_ref(), id),
        BatchCommands::Status { id } => status(config, id),
        BatchCommands::Run { id, command } => run(config, id, command),
        BatchCommands::Resume { id } => {
            let mut coordinator = coordinator(config)?;
            let report = coordinator.resume(id)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        BatchCommands::Abort { id, reason } => {
            let mut coordinator = coordinator(config)?;
            coordinator.resume(id)?;
            let summary = coordinator.abort(reason)?;
            println!("Batch {} aborted at item {}.", summary.batch_id, summary.current_index);
            Ok(())
        }
    }
}

fn coordinator(config: &WaypointConfig) -> anyhow::Result<BatchCoordinator> {
    let pipeline = AuthorizationPipeline::standard(config, Box::new(DeferredPrompt))?;
    Ok(BatchCoordinator::from_config(config, pipeline))
}

fn submit(
    config: &WaypointConfig,
    items: &[String],
    file: Option<&PathBuf>,
    id: &Option<String>,
) -> anyhow::Result<()> {
    let mut descriptions = items.to_vec();
    if let Some(path) = file {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
        descriptions.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }

    let mut coordinator = coordinator(config)?;
    let summary = coordinator.submit(id.clone(), descriptions)?;
    println!("Submitted batch {}", summary.batch_id);
    if let Some(state) = coordinator.state() {
        print_items(state);
    }
    Ok(())
}

fn status(config: &WaypointConfig, id: &str) -> anyhow::Result<()> {
    let checkpoints = CheckpointManager::new(&config.checkpoint_dir, config.checkpoint_retention)
        .with_state_file(&config.batch_state_file);
    let recovery = checkpoints.recover(id)?;
    for note in &recovery.fallbacks {
        println!("note: {}", note);
    }
    let Some(state) = recovery.state else {
        println!("No saved state for batch {}", id);
        return Ok(());
    };

    println!("Batch:    {}", state.batch_id);
    println!("Status:   {}", state.status);
    println!("Progress: {}/{}", state.current_index(), state.total_items());
    println!(
        "Done:     {} completed, {} failed",
        state.completed().len(),
        state.failed().len()
    );
    println!("Source:   {}", recovery.source);
    if let Some(run_id) = state.current_run_id() {
        let mut tracker = StageTracker::new(&config.pipeline_log_dir);
        match tracker.next_stage(run_id) {
            Ok(Some(stage)) => println!("Next:     item {} at stage {}", state.current_index(), stage),
            Ok(None) => println!("Next:     item {} (all stages done)", state.current_index()),
            Err(e) => println!("Next:     item {} (run {}: {})", state.current_index(), run_id, e),
        }
    }
    println!();
    print_items(&state);
    Ok(())
}

fn print_items(state: &BatchState) {
    println!("{:<6} {:<12} DESCRIPTION", "INDEX", "STATUS");
    println!("{}", "-".repeat(60));
    for item in &state.items {
        println!("{:<6} {:<12} {}", item.index, item.status.to_string(), item.description);
    }
}

fn run(config: &WaypointConfig, id: &str, command: &str) -> anyhow::Result<()> {
    let mut coordinator = coordinator(config)?;
    let report = coordinator.resume(id)?;
    if let (Some(index), Some(stage)) = (report.next_index, report.next_stage) {
        println!("Resuming batch {} at item {} ({})", id, index, stage);
    }

    let mut executor = ShellStageExecutor {
        batch_id: id.to_string(),
        command: command.to_string(),
        project_root: config.project_root.clone(),
    };
    match coordinator.run(&mut executor) {
        Ok(summary) => {
            println!(
                "Batch {} {}: {} completed, {} failed.",
                summary.batch_id,
                summary.status,
                summary.completed.len(),
                summary.failed.len()
            );
            Ok(())
        }
        Err(BatchError::Interrupted { index, stage, .. }) => {
            println!(
                "Interrupted at item {}, stage {}. Run `waypoint batch run {} --command ...` to continue.",
                index, stage, id
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs one shell command per stage, after authorizing it.
struct ShellStageExecutor {
    batch_id: String,
    command: String,
    project_root: PathBuf,
}

impl StageExecutor for ShellStageExecutor {
    fn run_stage(
        &mut self,
        item: &WorkItem,
        ctx: &mut StageContext<'_>,
    ) -> Result<String, StageFailure> {
        let outcome = ctx.authorize(&ToolAction::shell(&self.command));
        if !outcome.decision.is_safe() {
            return Err(StageFailure::failed(outcome.explanation()));
        }

        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.project_root)
            .env("WAYPOINT_BATCH_ID", &self.batch_id)
            .env("WAYPOINT_ITEM_INDEX", item.index.to_string())
            .env("WAYPOINT_ITEM", &item.description)
            .env("WAYPOINT_STAGE", ctx.stage().as_str())
            .env("WAYPOINT_RUN_ID", ctx.run_id())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| StageFailure::failed(format!("failed to spawn stage command: {}", e)))?;

        wait_with_deadline(child, ctx)
    }
}

fn wait_with_deadline(mut child: Child, ctx: &StageContext<'_>) -> Result<String, StageFailure> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return match status.code() {
                    Some(0) => Ok(format!("{} command succeeded", ctx.stage())),
                    Some(code) => Err(StageFailure::failed(format!(
                        "stage command exited with status {}",
                        code
                    ))),
                    None => Err(StageFailure::Interrupted),
                };
            }
            Ok(None) if ctx.deadline_passed() => {
                if let Err(e) = child.kill() {
                    tracing::warn!("failed to kill overrunning stage command: {}", e);
                }
                let _ = child.wait();
                return Err(StageFailure::failed("stage command exceeded its time budget"));
            }
            Ok(None) => thread::sleep(Duration::from_millis(50)),
            Err(e) => return Err(StageFailure::failed(format!("failed to wait on stage command: {}", e))),
        }
    }
}
