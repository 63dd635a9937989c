// policy.rs — Policy subcommands: check, init.

use clap::Subcommand;
use wp_authz::{AuthorizationPipeline, SandboxLayer, TrustLayer, ValidatorLayer};
use wp_config::WaypointConfig;
use wp_policy::{PolicyState, PolicyStore, SecurityPolicy, ToolAction};

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Load the policy and optionally dry-run one action against it.
    ///
    /// The dry run uses the sandbox, validator, and trust layers only; no
    /// consent is consulted and nothing is written to the audit log.
    Check {
        /// Shell command to check.
        #[arg(long, conflicts_with_all = ["read", "write", "url"])]
        command: Option<String>,
        /// File path to check for reading.
        #[arg(long, conflicts_with_all = ["write", "url"])]
        read: Option<String>,
        /// File path to check for writing.
        #[arg(long, conflicts_with = "url")]
        write: Option<String>,
        /// URL to check for network access.
        #[arg(long)]
        url: Option<String>,
        /// Caller identity for the trust layer.
        #[arg(long, default_value = "implement")]
        caller: String,
    },
    /// Write the built-in default policy to .waypoint/policy.json.
    Init {
        /// Overwrite an existing policy file.
        #[arg(long)]
        force: bool,
    },
}

pub fn execute(cmd: &PolicyCommands, config: &WaypointConfig) -> anyhow::Result<()> {
    match cmd {
        PolicyCommands::Check {
            command,
            read,
            write,
            url,
            caller,
        } => {
            let store = PolicyStore::open(&config.policy_file);
            match store.state() {
                PolicyState::Loaded(compiled) => {
                    let policy = compiled.policy();
                    println!("Policy loaded from {}", config.policy_file.display());
                    println!(
                        "  {} allowed / {} blocked path rules, {} safe / {} approval / {} blocked command rules",
                        policy.paths.allowed.len(),
                        policy.paths.blocked.len(),
                        policy.commands.safe.len(),
                        policy.commands.approval.len(),
                        policy.commands.blocked.len(),
                    );
                }
                PolicyState::FailedClosed(e) => {
                    println!("Policy FAILED CLOSED: {}", e);
                    println!("  Every action will need approval until this is fixed.");
                }
            }

            let action = match (command, read, write, url) {
                (Some(c), _, _, _) => ToolAction::shell(c.as_str()),
                (_, Some(p), _, _) => ToolAction::read(p.as_str()),
                (_, _, Some(p), _) => ToolAction::write(p.as_str()),
                (_, _, _, Some(u)) => ToolAction::network(u.as_str()),
                _ => return Ok(()),
            };

            println!();
            println!(
                "Risk class: {}",
                store.classify(&action, &config.project_root)
            );
            let mut pipeline = AuthorizationPipeline::new(&config.project_root)
                .with_layer(Box::new(SandboxLayer::new(store)))
                .with_layer(Box::new(ValidatorLayer::new()))
                .with_layer(Box::new(TrustLayer::new(config.trusted_callers.iter().cloned())));
            let outcome = pipeline.authorize(caller, &action);
            for verdict in &outcome.layers {
                match &verdict.error {
                    Some(e) => println!("  {:<10} error: {}", verdict.layer, e),
                    None => println!("  {:<10} {}", verdict.layer, verdict.decision),
                }
            }
            println!("Decision: {}", outcome.explanation());
            Ok(())
        }

        PolicyCommands::Init { force } => {
            if config.policy_file.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config.policy_file.display()
                );
            }
            wp_store::write_json(&config.policy_file, &SecurityPolicy::default())?;
            println!("Wrote default policy to {}", config.policy_file.display());
            Ok(())
        }
    }
}
