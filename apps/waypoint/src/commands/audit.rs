// audit.rs — Audit subcommands: verify, tail.

use std::path::PathBuf;

use clap::Subcommand;
use wp_audit::{AuditError, AuditLog};
use wp_config::WaypointConfig;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the audit log hash chain.
    Verify {
        /// Path to audit log (defaults to .waypoint/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Show recent audit records.
    Tail {
        /// Path to audit log (defaults to .waypoint/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Number of records to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
}

pub fn execute(cmd: &AuditCommands, config: &WaypointConfig) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Verify { log } => {
            let path = log.clone().unwrap_or_else(|| config.audit_log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            match AuditLog::verify_chain(&path) {
                Ok(count) => {
                    println!("Audit log verified: {} record(s), hash chain intact.", count);
                }
                Err(AuditError::IntegrityViolation {
                    line,
                    expected,
                    actual,
                }) => {
                    println!("INTEGRITY VIOLATION at line {}:", line);
                    println!("  Expected previous_hash: {}", expected);
                    println!("  Actual previous_hash:   {}", actual);
                    println!();
                    println!("The audit log may have been tampered with.");
                    anyhow::bail!("audit log integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        AuditCommands::Tail { log, n } => {
            let path = log.clone().unwrap_or_else(|| config.audit_log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            let recent = AuditLog::tail(&path, *n)?;
            if recent.is_empty() {
                println!("No audit records.");
                return Ok(());
            }

            println!(
                "{:<20} {:<15} {:<17} {:<10} {:<15} SIGNATURE / REASON",
                "TIMESTAMP", "CALLER", "ACTION", "LAYER", "VERDICT"
            );
            println!("{}", "-".repeat(100));
            for event in recent {
                let verdict = event
                    .verdict
                    .map(|v| format!("{:?}", v))
                    .unwrap_or_else(|| "-".to_string());
                let detail = match (&event.signature, &event.reason) {
                    (Some(sig), Some(reason)) => format!("{} ({})", sig, reason),
                    (Some(sig), None) => sig.clone(),
                    (None, Some(reason)) => reason.clone(),
                    (None, None) => "-".to_string(),
                };
                println!(
                    "{:<20} {:<15} {:<17} {:<10} {:<15} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.caller,
                    format!("{:?}", event.action),
                    event.layer.as_deref().unwrap_or("-"),
                    verdict,
                    detail,
                );
            }
        }
    }

    Ok(())
}
