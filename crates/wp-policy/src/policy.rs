// policy.rs — The declarative security policy file.
//
// Loaded from `.waypoint/policy.json` (or `.yaml`/`.yml`). Every section and
// every list inside it is optional; anything missing falls back to the built-in
// defaults below, so a policy file only has to state what it changes.
//
// Example:
//   {
//     "version": 1,
//     "paths":    { "allowed": ["src/", "tests/"], "blocked": ["/etc", "**/.env"] },
//     "commands": { "safe": ["cargo test*"], "approval": ["git push*"], "blocked": ["sudo *"] },
//     "risk":     { "destructive": ["rm *"], "network": ["curl *"], "benign": ["ls*"] },
//     "network":  { "allowed_hosts": ["docs.rs"] }
//   }

use serde::{Deserialize, Serialize};

/// Newest policy schema this build understands.
pub const POLICY_SCHEMA_VERSION: u32 = 1;

/// The complete security policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityPolicy {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub paths: PathRules,

    #[serde(default)]
    pub commands: CommandRules,

    #[serde(default)]
    pub risk: RiskRules,

    #[serde(default)]
    pub network: NetworkRules,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            version: POLICY_SCHEMA_VERSION,
            paths: PathRules::default(),
            commands: CommandRules::default(),
            risk: RiskRules::default(),
            network: NetworkRules::default(),
        }
    }
}

/// Path prefixes, relative to the workspace root unless absolute.
///
/// Entries containing glob metacharacters (`*`, `?`, `[`) are matched as
/// globs; a leading `~/` is expanded to the home directory; everything else is
/// a component-wise prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathRules {
    /// Writes under these prefixes are safe.
    #[serde(default = "default_allowed_paths")]
    pub allowed: Vec<String>,
    /// Reads and writes under these prefixes are always blocked.
    #[serde(default = "default_blocked_paths")]
    pub blocked: Vec<String>,
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            allowed: default_allowed_paths(),
            blocked: default_blocked_paths(),
        }
    }
}

/// Glob patterns over the whitespace-normalized command line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandRules {
    #[serde(default = "default_safe_commands")]
    pub safe: Vec<String>,
    #[serde(default = "default_approval_commands")]
    pub approval: Vec<String>,
    #[serde(default = "default_blocked_commands")]
    pub blocked: Vec<String>,
}

impl Default for CommandRules {
    fn default() -> Self {
        Self {
            safe: default_safe_commands(),
            approval: default_approval_commands(),
            blocked: default_blocked_commands(),
        }
    }
}

/// Risk classification rules for shell commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskRules {
    #[serde(default = "default_destructive_commands")]
    pub destructive: Vec<String>,
    #[serde(default = "default_network_commands")]
    pub network: Vec<String>,
    #[serde(default = "default_benign_commands")]
    pub benign: Vec<String>,
}

impl Default for RiskRules {
    fn default() -> Self {
        Self {
            destructive: default_destructive_commands(),
            network: default_network_commands(),
            benign: default_benign_commands(),
        }
    }
}

/// Network access rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkRules {
    /// Hosts that can be fetched without approval.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

fn default_version() -> u32 {
    POLICY_SCHEMA_VERSION
}

fn default_allowed_paths() -> Vec<String> {
    strings(&["src/", "tests/", "docs/", "lib/", "benches/"])
}

// Host tools send absolute paths, so the home-directory secrets are listed
// both as `~/` prefixes and as globs that match them under any home.
fn default_blocked_paths() -> Vec<String> {
    strings(&[
        "/etc", "/usr", "/bin", "/sbin", "/boot", "/var", "/root", "~/.ssh", "~/.aws",
        "~/.gnupg", "*/.ssh/*", "*/.aws/*", "*/.gnupg/*", ".git/", "**/.env", "**/*.pem",
        "**/id_rsa*",
    ])
}

fn default_safe_commands() -> Vec<String> {
    strings(&[
        "ls", "ls *", "pwd", "git status*", "git diff*", "git log*", "git show*",
        "cargo test*", "cargo check*", "cargo build*", "cargo clippy*", "cargo fmt*",
        "pytest*", "npm test*", "npm run lint*",
    ])
}

fn default_approval_commands() -> Vec<String> {
    strings(&[
        "git commit*", "git push*", "git tag*", "gh pr *", "npm publish*",
        "cargo publish*",
    ])
}

fn default_blocked_commands() -> Vec<String> {
    strings(&[
        "rm -rf /", "rm -rf /*", "rm -rf ~*", "sudo *", "su *", "mkfs*", "dd if=*",
        "chmod -R 777 /*", "git push --force*", "git push -f*",
    ])
}

fn default_destructive_commands() -> Vec<String> {
    strings(&[
        "rm *", "rmdir *", "mv *", "chmod *", "chown *", "truncate *",
        "git reset --hard*", "git clean*", "git checkout -- *", "git branch -D *",
    ])
}

fn default_network_commands() -> Vec<String> {
    strings(&[
        "curl *", "wget *", "ssh *", "scp *", "rsync *", "git push*", "git pull*",
        "git fetch*", "git clone*", "npm install*", "pip install*", "cargo install*",
    ])
}

fn default_benign_commands() -> Vec<String> {
    strings(&[
        "ls*", "pwd", "cat *", "head *", "tail *", "wc *", "grep *", "rg *", "find *",
        "echo *", "which *", "diff *", "git status*", "git diff*", "git log*",
        "cargo test*", "cargo check*", "cargo build*",
    ])
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
