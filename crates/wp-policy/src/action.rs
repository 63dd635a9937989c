// action.rs — The externally visible actions a stage can attempt.
//
// Each action has a canonical signature used as the consent-cache key and in
// audit records. Canonicalization is purely lexical: whitespace in commands is
// collapsed, URL schemes and hosts are lowercased. Paths are kept exactly as
// given so the validator sees what the caller actually sent.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// An action submitted for authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolAction {
    /// Run a shell command.
    Shell { command: String },
    /// Read a file.
    FileRead { path: PathBuf },
    /// Create or modify a file.
    FileWrite { path: PathBuf },
    /// Reach out over the network.
    Network { url: String },
    /// A tool this engine has no specific rules for.
    Other { tool: String, detail: String },
}

impl ToolAction {
    pub fn shell(command: impl Into<String>) -> Self {
        ToolAction::Shell {
            command: command.into(),
        }
    }

    pub fn read(path: impl Into<PathBuf>) -> Self {
        ToolAction::FileRead { path: path.into() }
    }

    pub fn write(path: impl Into<PathBuf>) -> Self {
        ToolAction::FileWrite { path: path.into() }
    }

    pub fn network(url: impl Into<String>) -> Self {
        ToolAction::Network { url: url.into() }
    }

    /// Map a host tool call (name + JSON input) onto an action.
    ///
    /// Unknown tools, or known tools with missing arguments, become `Other`
    /// so they still go through the pipeline instead of slipping past it.
    pub fn from_tool_call(tool_name: &str, input: &serde_json::Value) -> Self {
        let field = |key: &str| input.get(key).and_then(|v| v.as_str());
        let detail = || input.to_string();

        match tool_name {
            "Bash" | "shell" => match field("command") {
                Some(command) => ToolAction::shell(command),
                None => ToolAction::other(tool_name, detail()),
            },
            "Read" | "Glob" | "Grep" => match field("file_path").or_else(|| field("path")) {
                Some(path) => ToolAction::read(path),
                None => ToolAction::other(tool_name, detail()),
            },
            "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => {
                match field("file_path").or_else(|| field("notebook_path")) {
                    Some(path) => ToolAction::write(path),
                    None => ToolAction::other(tool_name, detail()),
                }
            }
            "WebFetch" => match field("url") {
                Some(url) => ToolAction::network(url),
                None => ToolAction::other(tool_name, detail()),
            },
            _ => ToolAction::other(tool_name, detail()),
        }
    }

    fn other(tool: &str, detail: String) -> Self {
        ToolAction::Other {
            tool: tool.to_string(),
            detail,
        }
    }

    /// Short tool name recorded in stage records ("shell", "file_write", ...).
    pub fn tool_name(&self) -> &str {
        match self {
            ToolAction::Shell { .. } => "shell",
            ToolAction::FileRead { .. } => "file_read",
            ToolAction::FileWrite { .. } => "file_write",
            ToolAction::Network { .. } => "network",
            ToolAction::Other { tool, .. } => tool,
        }
    }

    /// The file path this action touches, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ToolAction::FileRead { path } | ToolAction::FileWrite { path } => Some(path),
            _ => None,
        }
    }

    /// Canonical signature, stable across whitespace and case noise.
    pub fn signature(&self) -> String {
        match self {
            ToolAction::Shell { command } => format!("shell:{}", normalize_command(command)),
            ToolAction::FileRead { path } => format!("read:{}", path.display()),
            ToolAction::FileWrite { path } => format!("write:{}", path.display()),
            ToolAction::Network { url } => format!("net:{}", normalize_url(url)),
            ToolAction::Other { tool, detail } => format!("tool:{}:{}", tool, detail),
        }
    }
}

impl fmt::Display for ToolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Collapse runs of whitespace so "git  push" and "git push" share a key.
pub fn normalize_command(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase the scheme and host; leave the path and query untouched.
fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let (host, tail) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    format!(
        "{}://{}{}",
        scheme.to_ascii_lowercase(),
        host.to_ascii_lowercase(),
        tail
    )
}

/// Host portion of a URL, lowercased, without port or credentials.
pub fn url_host(url: &str) -> Option<String> {
    let (_, rest) = url.trim().split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let host = host_port.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}
