// stage.rs — The canonical stage sequence.
//
//   research → plan → test → implement → review → security-audit
//     → document → commit
//
// A work item is complete only when every stage here has a completed record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StageError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Research,
    Plan,
    Test,
    Implement,
    Review,
    SecurityAudit,
    Document,
    Commit,
}

impl Stage {
    /// Every stage, in the order it runs.
    pub const ALL: [Stage; 8] = [
        Stage::Research,
        Stage::Plan,
        Stage::Test,
        Stage::Implement,
        Stage::Review,
        Stage::SecurityAudit,
        Stage::Document,
        Stage::Commit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Plan => "plan",
            Stage::Test => "test",
            Stage::Implement => "implement",
            Stage::Review => "review",
            Stage::SecurityAudit => "security-audit",
            Stage::Document => "document",
            Stage::Commit => "commit",
        }
    }

    /// Zero-based position in the canonical sequence.
    pub fn position(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.position() + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Stage::ALL
            .iter()
            .find(|stage| stage.as_str() == wanted)
            .copied()
            .ok_or_else(|| StageError::UnknownStage(s.to_string()))
    }
}
