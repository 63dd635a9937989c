// consent.rs — Consent subcommands: list, approve, deny, reset.
//
// Every change is written to the consent store and to the audit log, the
// same way the consent layer records a prompted decision.

use clap::Subcommand;
use wp_audit::{AuditAction, AuditEvent, AuditLog, AuditVerdict};
use wp_config::WaypointConfig;
use wp_consent::ConsentCache;

#[derive(Subcommand)]
pub enum ConsentCommands {
    /// List cached decisions and circuit breakers.
    List {
        /// Only show entries for this caller.
        #[arg(long)]
        caller: Option<String>,
    },
    /// Approve an action signature for a caller.
    Approve {
        caller: String,
        /// Canonical signature, as printed by the hook (e.g. "shell:git push origin main").
        signature: String,
    },
    /// Deny an action signature for a caller.
    Deny { caller: String, signature: String },
    /// Clear a caller's denial counter and lockout.
    Reset { caller: String },
}

pub fn execute(cmd: &ConsentCommands, config: &WaypointConfig) -> anyhow::Result<()> {
    let mut cache = ConsentCache::open(&config.consent_store, config.circuit_breaker_threshold)?;

    match cmd {
        ConsentCommands::List { caller } => list(&cache, caller.as_deref()),
        ConsentCommands::Approve { caller, signature } => {
            record(config, &mut cache, caller, signature, true)
        }
        ConsentCommands::Deny { caller, signature } => {
            record(config, &mut cache, caller, signature, false)
        }
        ConsentCommands::Reset { caller } => {
            if cache.reset(caller)? {
                let mut log = AuditLog::open(&config.audit_log)?;
                log.append(
                    &mut AuditEvent::new(caller.as_str(), AuditAction::BreakerReset)
                        .with_layer("consent")
                        .with_reason("reset from the command line"),
                )?;
                println!("Reset circuit breaker for {}.", caller);
            } else {
                println!("No circuit breaker state for {}.", caller);
            }
            Ok(())
        }
    }
}

fn list(cache: &ConsentCache, caller: Option<&str>) -> anyhow::Result<()> {
    let wanted = |c: &str| caller.map_or(true, |w| w == c);

    println!("{:<16} {:<9} {:<20} SIGNATURE", "CALLER", "DECISION", "WHEN");
    println!("{}", "-".repeat(80));
    for entry in cache.entries().iter().filter(|e| wanted(&e.caller)) {
        println!(
            "{:<16} {:<9} {:<20} {}",
            entry.caller,
            if entry.approved { "approved" } else { "denied" },
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.signature,
        );
    }

    println!();
    println!(
        "{:<16} {:<8} {:<8} TRIPPED (threshold {})",
        "CALLER",
        "DENIALS",
        "LOCKED",
        cache.threshold()
    );
    println!("{}", "-".repeat(60));
    for (name, breaker) in cache.breakers().filter(|(c, _)| wanted(c)) {
        println!(
            "{:<16} {:<8} {:<8} {}",
            name,
            breaker.consecutive_denials,
            if breaker.auto_approval_disabled { "yes" } else { "no" },
            breaker
                .tripped_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn record(
    config: &WaypointConfig,
    cache: &mut ConsentCache,
    caller: &str,
    signature: &str,
    approved: bool,
) -> anyhow::Result<()> {
    let outcome = cache.record(caller, signature, approved)?;

    let mut log = AuditLog::open(&config.audit_log)?;
    log.append(
        &mut AuditEvent::new(caller, AuditAction::ConsentRecorded)
            .with_signature(signature)
            .with_layer("consent")
            .with_verdict(if approved {
                AuditVerdict::Safe
            } else {
                AuditVerdict::Blocked
            })
            .with_metadata(serde_json::json!({
                "consecutive_denials": outcome.entry.consecutive_denials,
                "source": "cli",
            })),
    )?;
    if outcome.tripped {
        log.append(
            &mut AuditEvent::new(caller, AuditAction::BreakerTripped)
                .with_layer("consent")
                .with_reason(format!(
                    "{} consecutive denials; auto-approval disabled until reset",
                    outcome.entry.consecutive_denials
                )),
        )?;
    }

    println!(
        "{} {} for {}",
        if approved { "Approved" } else { "Denied" },
        signature,
        caller
    );
    if outcome.tripped {
        println!(
            "{} has reached {} consecutive denials; auto-approval is disabled until `waypoint consent reset {}`.",
            caller, outcome.entry.consecutive_denials, caller
        );
    } else if cache.is_locked(caller) {
        println!("Note: auto-approval remains disabled for {} until reset.", caller);
    }
    Ok(())
}
