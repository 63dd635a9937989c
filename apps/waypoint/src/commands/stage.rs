// stage.rs — Stage subcommands: start, complete, fail, status.
//
// For hosts that run stages themselves and only need Waypoint to keep the
// pipeline log.

use clap::Subcommand;
use wp_config::WaypointConfig;
use wp_pipeline::{Stage, StageTracker};

#[derive(Subcommand)]
pub enum StageCommands {
    /// Record the start of a stage.
    Start {
        /// Pipeline run id.
        run_id: String,
        /// Stage name (research, plan, test, implement, review, security-audit, document, commit).
        stage: Stage,
    },
    /// Record a stage as completed.
    Complete {
        run_id: String,
        stage: Stage,
        /// Short summary of what the stage did.
        #[arg(long, default_value = "")]
        summary: String,
        /// Tools the stage used (repeatable).
        #[arg(long = "tool")]
        tools: Vec<String>,
    },
    /// Record a stage as failed.
    Fail {
        run_id: String,
        stage: Stage,
        /// Why the stage failed.
        #[arg(long)]
        reason: String,
    },
    /// Show a run's records and completeness.
    Status {
        run_id: String,
    },
}

pub fn execute(cmd: &StageCommands, config: &WaypointConfig) -> anyhow::Result<()> {
    let mut tracker = StageTracker::new(&config.pipeline_log_dir);

    match cmd {
        StageCommands::Start { run_id, stage } => {
            let record = tracker.start(run_id, *stage)?;
            println!("{} started (attempt {}) in run {}", stage, record.attempt, run_id);
        }
        StageCommands::Complete {
            run_id,
            stage,
            summary,
            tools,
        } => {
            let record = tracker.complete(run_id, *stage, summary.as_str(), tools.clone())?;
            println!(
                "{} completed in {:.1}s",
                stage,
                record.duration_seconds.unwrap_or_default()
            );
            if let Some(next) = tracker.next_stage(run_id)? {
                println!("Next stage: {}", next);
            } else {
                println!("All stages completed.");
            }
        }
        StageCommands::Fail {
            run_id,
            stage,
            reason,
        } => {
            let record = tracker.fail(run_id, *stage, reason.as_str())?;
            println!("{} failed (attempt {}): {}", stage, record.attempt, reason);
        }
        StageCommands::Status { run_id } => {
            let run = tracker.run(run_id)?.clone();
            println!("Run:     {}", run.session_id);
            println!("Started: {}", run.started.format("%Y-%m-%d %H:%M:%S"));
            println!();
            println!(
                "{:<16} {:<10} {:<8} {:>9}  MESSAGE",
                "STAGE", "STATUS", "ATTEMPT", "SECONDS"
            );
            println!("{}", "-".repeat(72));
            for record in &run.agents {
                println!(
                    "{:<16} {:<10} {:<8} {:>9}  {}",
                    record.agent.as_str(),
                    record.status.to_string(),
                    record.attempt,
                    record
                        .duration_seconds
                        .map(|s| format!("{:.1}", s))
                        .unwrap_or_else(|| "-".to_string()),
                    record.message.as_deref().unwrap_or(""),
                );
            }
            println!();
            let completeness = run.completeness();
            if completeness.complete {
                println!("Complete. Total {:.1}s.", run.total_duration_seconds());
            } else {
                let missing: Vec<&str> =
                    completeness.missing_stages.iter().map(|s| s.as_str()).collect();
                println!("Missing: {}", missing.join(", "));
            }
        }
    }

    Ok(())
}
