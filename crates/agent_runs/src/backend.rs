use std::fmt;
use std::str::FromStr;

use run_events::AgentKind;
use serde::{Deserialize, Serialize};

/// Coding-agent CLI a session is bound to for its whole lifetime.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Claude,
    Codex,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Claude => "claude",
            Backend::Codex => "codex",
        }
    }

    pub fn agent_kind(self) -> AgentKind {
        match self {
            Backend::Claude => AgentKind::ClaudeCode,
            Backend::Codex => AgentKind::Codex,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "claude_code" | "claude-code" => Ok(Backend::Claude),
            "codex" => Ok(Backend::Codex),
            other => Err(format!("unknown backend `{other}` (expected claude or codex)")),
        }
    }
}

/// Backend-independent permission posture, translated per backend by the argument builder.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    #[default]
    Plan,
    Build,
    Yolo,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Plan => "plan",
            PermissionMode::Build => "build",
            PermissionMode::Yolo => "yolo",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(PermissionMode::Plan),
            "build" => Ok(PermissionMode::Build),
            "yolo" => Ok(PermissionMode::Yolo),
            other => Err(format!(
                "unknown permission mode `{other}` (expected plan, build or yolo)"
            )),
        }
    }
}

/// Opaque token continuing a prior conversation. Exactly one variant per backend.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResumeToken {
    ClaudeSession(String),
    CodexThread(String),
}

impl ResumeToken {
    pub fn for_backend(backend: Backend, token: impl Into<String>) -> Self {
        match backend {
            Backend::Claude => ResumeToken::ClaudeSession(token.into()),
            Backend::Codex => ResumeToken::CodexThread(token.into()),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            ResumeToken::ClaudeSession(_) => Backend::Claude,
            ResumeToken::CodexThread(_) => Backend::Codex,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResumeToken::ClaudeSession(id) | ResumeToken::CodexThread(id) => id,
        }
    }
}
