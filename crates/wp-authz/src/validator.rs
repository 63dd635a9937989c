// validator.rs — Layer 2: path and command security validation.
//
// Looks only at the literal path/command string and filesystem metadata.
// Nothing is executed. Any finding is a ValidationError and maps to Blocked.

use std::path::{Component, Path, PathBuf};

use wp_policy::{PolicyDecision, ToolAction};

use crate::error::{AuthzError, ValidationError};
use crate::layer::{AuthorizationLayer, LayerContext};

/// Percent-encoded spellings of `..` (checked case-insensitively).
const ENCODED_TRAVERSAL: [&str; 3] = ["%2e%2e", "%2e.", ".%2e"];

#[derive(Debug, Default)]
pub struct ValidatorLayer;

impl ValidatorLayer {
    pub fn new() -> Self {
        Self
    }
}

impl AuthorizationLayer for ValidatorLayer {
    fn name(&self) -> &str {
        "validator"
    }

    fn evaluate(&mut self, ctx: &LayerContext<'_>) -> Result<PolicyDecision, AuthzError> {
        let finding = match ctx.action {
            ToolAction::Shell { command } => validate_command(command).err(),
            ToolAction::FileRead { path } | ToolAction::FileWrite { path } => {
                match validate_path_text(&path.to_string_lossy()) {
                    Err(e) => Some(e),
                    Ok(()) => check_symlink_escape(path, ctx.workspace_root)?.err(),
                }
            }
            ToolAction::Network { url } => reject_null_byte(url).err(),
            ToolAction::Other { .. } => None,
        };

        match finding {
            Some(err) => {
                tracing::warn!(caller = %ctx.caller, signature = %ctx.signature, "validation failed: {}", err);
                Ok(PolicyDecision::blocked(err.to_string()))
            }
            None => Ok(PolicyDecision::Safe),
        }
    }
}

fn reject_null_byte(input: &str) -> Result<(), ValidationError> {
    if input.contains('\0') {
        return Err(ValidationError::NullByte {
            input: input.replace('\0', "\\0"),
        });
    }
    Ok(())
}

/// Literal checks on a path string: null bytes, `..`, encoded `..`.
pub fn validate_path_text(input: &str) -> Result<(), ValidationError> {
    reject_null_byte(input)?;

    let lowered = input.to_ascii_lowercase();
    if ENCODED_TRAVERSAL.iter().any(|enc| lowered.contains(enc)) {
        return Err(ValidationError::EncodedTraversal {
            input: input.to_string(),
        });
    }
    if input.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(ValidationError::Traversal {
            input: input.to_string(),
        });
    }
    Ok(())
}

/// Reject shell metacharacters outside single quotes, and traversal in any
/// argument.
pub fn validate_command(command: &str) -> Result<(), ValidationError> {
    reject_null_byte(command)?;
    scan_metacharacters(command)?;
    for token in command.split_whitespace() {
        let token = token.trim_matches(|c| c == '\'' || c == '"');
        validate_path_text(token)?;
    }
    Ok(())
}

fn scan_metacharacters(command: &str) -> Result<(), ValidationError> {
    let injection = |metachar: &str| ValidationError::ShellInjection {
        metachar: metachar.to_string(),
        command: command.to_string(),
    };

    let chars: Vec<char> = command.chars().collect();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if in_single {
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }

        match c {
            '\\' => {
                i += 2;
                continue;
            }
            '\'' if !in_double => in_single = true,
            '"' => in_double = !in_double,
            '`' => return Err(injection("`")),
            '$' if matches!(next, Some('(') | Some('{')) => {
                return Err(injection(if next == Some('(') { "$(" } else { "${" }));
            }
            _ if in_double => {}
            ';' => return Err(injection(";")),
            '\n' | '\r' => return Err(injection("newline")),
            '&' => return Err(injection(if next == Some('&') { "&&" } else { "&" })),
            '|' => return Err(injection(if next == Some('|') { "||" } else { "|" })),
            '>' => return Err(injection(">")),
            '<' => return Err(injection("<")),
            _ => {}
        }
        i += 1;
    }

    if in_single || in_double {
        return Err(injection("unterminated quote"));
    }
    Ok(())
}

/// Resolve the deepest existing ancestor of `path` and make sure it is
/// still inside the workspace. Paths that are lexically outside the
/// workspace are left to the sandbox rules.
fn check_symlink_escape(
    path: &Path,
    root: &Path,
) -> Result<Result<(), ValidationError>, AuthzError> {
    let full = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    if !full.starts_with(root) {
        return Ok(Ok(()));
    }

    let canonical_root = root.canonicalize().map_err(|source| AuthzError::Filesystem {
        path: root.to_path_buf(),
        source,
    })?;

    let Some(existing) = full.ancestors().find(|a| a.symlink_metadata().is_ok()) else {
        return Ok(Ok(()));
    };

    let resolved = match existing.canonicalize() {
        Ok(resolved) => resolved,
        // Dangling symlink: judge it by where it points.
        Err(_) => match std::fs::read_link(existing) {
            Ok(target) => {
                let base = existing.parent().unwrap_or(Path::new("/"));
                lexical_resolve(&base.join(target))
            }
            Err(source) => {
                return Err(AuthzError::Filesystem {
                    path: existing.to_path_buf(),
                    source,
                })
            }
        },
    };

    if resolved.starts_with(&canonical_root) || resolved.starts_with(root) {
        Ok(Ok(()))
    } else {
        Ok(Err(ValidationError::SymlinkEscape {
            path: path.to_path_buf(),
            resolved,
        }))
    }
}

fn lexical_resolve(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
